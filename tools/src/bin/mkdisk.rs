//! Creates a zero-filled disk image and formats it.

use clap::{value_t, App, Arg};
use diskfs::io::FileBlockEmulatorBuilder;
use diskfs::{DiskFs, MAX_BLOCKS};
use std::fs::OpenOptions;
use tools::{exit_with, logger};

pub fn main() {
    let matches = App::new("mkdisk")
        .about("Creates and formats a disk image")
        .arg(
            Arg::with_name("image")
                .help("Path of the image to create")
                .default_value(".disk")
                .index(1),
        )
        .arg(
            Arg::with_name("blocks")
                .short("b")
                .long("blocks")
                .takes_value(true)
                .default_value("10240")
                .help("Number of 512 byte blocks in the image"),
        )
        .arg(
            Arg::with_name("force")
                .short("f")
                .long("force")
                .help("Overwrite an existing image"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("Raises log verbosity, repeat for more"),
        )
        .get_matches();

    logger::init(matches.occurrences_of("verbose"));

    let image = matches.value_of("image").unwrap_or(".disk");
    let blocks = value_t!(matches, "blocks", usize).unwrap_or_else(|e| e.exit());
    if blocks > MAX_BLOCKS {
        exit_with("mkdisk", format!("at most {} blocks are supported", MAX_BLOCKS));
    }

    let mut options = OpenOptions::new();
    options.read(true).write(true);
    if matches.is_present("force") {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    let file = options.open(image).unwrap_or_else(|e| exit_with(image, e));

    let dev = FileBlockEmulatorBuilder::from(file)
        .with_block_count(blocks)
        .build()
        .unwrap_or_else(|e| exit_with(image, e));
    let mut fs = DiskFs::create(dev).unwrap_or_else(|e| exit_with(image, e));
    fs.sync().unwrap_or_else(|e| exit_with(image, e));

    println!(
        "{}: {} blocks, {} free",
        image,
        fs.block_count(),
        fs.free_blocks()
    );
}
