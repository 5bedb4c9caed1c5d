use clap::{Arg, ArgAction, Command};
use clap_num::maybe_hex;
use exhume_extfrag::report::{group_table, inode_table, superblock_table, FragReport};
use exhume_extfrag::ExtFS;
use log::info;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

struct Options {
    superblock: bool,
    groupdesc: bool,
    inodes: bool,
    json: bool,
}

fn process_image(file_path: &str, offset: u64, options: &Options) -> Result<(), String> {
    let file = File::open(file_path).map_err(|e| format!("Cannot open {}: {}", file_path, e))?;
    let mut filesystem =
        ExtFS::with_offset(BufReader::new(file), offset).map_err(|e| e.to_string())?;
    info!("ExtFS created successfully.");

    if options.superblock {
        if options.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&filesystem.superblock.to_json())
                    .map_err(|e| e.to_string())?
            );
        } else {
            superblock_table(&filesystem.superblock).printstd();
        }
    }

    let analysis = filesystem.analyze().map_err(|e| e.to_string())?;

    if options.groupdesc {
        if options.json {
            let json_array: Vec<_> = filesystem
                .get_bg_descriptors()
                .unwrap_or_default()
                .iter()
                .map(|group_descriptor| group_descriptor.to_json())
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json_array).map_err(|e| e.to_string())?
            );
        } else {
            let descriptors = filesystem.get_bg_descriptors().unwrap_or_default();
            group_table(descriptors, &analysis.stats).printstd();
        }
    }

    if options.inodes {
        if options.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&analysis.stats.inodes).map_err(|e| e.to_string())?
            );
        } else {
            inode_table(&analysis.stats).printstd();
        }
    }

    // The size column is named after the volume, or the image when it has no label.
    let label = match filesystem.superblock.s_volume_name.as_str() {
        "" => Path::new(file_path)
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "files".to_string()),
        name => name.to_string(),
    };
    let report = FragReport::from_analysis(&analysis, &label);
    if options.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report.to_json(&analysis.stats))
                .map_err(|e| e.to_string())?
        );
    } else {
        print!("{}", report.render());
    }
    Ok(())
}

fn main() {
    let matches = Command::new("exhume_extfrag")
        .version("0.1")
        .author("ForensicXlab")
        .about("Measure free-space and file fragmentation of an ext2/ext3 image.")
        .arg(
            Arg::new("body")
                .short('b')
                .long("body")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("The path to the filesystem image to analyze."),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_parser(maybe_hex::<u64>)
                .default_value("0")
                .help("The extfs partition starts at address 0x...."),
        )
        .arg(
            Arg::new("superblock")
                .short('s')
                .long("superblock")
                .action(ArgAction::SetTrue)
                .help("Display the superblock information."),
        )
        .arg(
            Arg::new("groupdesc")
                .short('g')
                .long("groupdesc")
                .action(ArgAction::SetTrue)
                .help("Display the group descriptors with their bitmap counts."),
        )
        .arg(
            Arg::new("inodes")
                .short('i')
                .long("inodes")
                .action(ArgAction::SetTrue)
                .help("Display the segment count of every analyzed inode."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let default_filter = if verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let file_path = match matches.get_one::<String>("body") {
        Some(path) => path,
        None => {
            eprintln!("Missing image path.");
            std::process::exit(1);
        }
    };
    let offset = matches.get_one::<u64>("offset").copied().unwrap_or(0);
    let options = Options {
        superblock: matches.get_flag("superblock"),
        groupdesc: matches.get_flag("groupdesc"),
        inodes: matches.get_flag("inodes"),
        json: matches.get_flag("json"),
    };

    if let Err(message) = process_image(file_path, offset, &options) {
        eprintln!("{}", message);
        std::process::exit(1);
    }
}
