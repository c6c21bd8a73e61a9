use clap::{value_t, App, Arg};
use log::error;

use std::fs::File;
use std::path::Path;
use std::process;

use cardboot::crc::SoftwareCrc;
use cardboot::sim::{DirStorage, SimFlash};
use cardboot::{Bootloader, Config, Geometry, VectorTable, Verify};

const PROGRAM: Option<&'static str> = option_env!("CARGO_PKG_NAME");
const VERSION: Option<&'static str> = option_env!("CARGO_PKG_VERSION");
const DESCRIPTION: Option<&'static str> = option_env!("CARGO_PKG_DESCRIPTION");

fn main() {
    env_logger::init();

    let matches = App::new(PROGRAM.unwrap_or("cardboot-sim"))
        .version(VERSION.unwrap_or("unknown"))
        .about(DESCRIPTION.unwrap_or(""))
        .arg(
            Arg::with_name("card")
                .short("c")
                .long("card")
                .value_name("DIR")
                .help("Directory standing in for the SD card")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("flash")
                .short("f")
                .long("flash")
                .value_name("FILE")
                .help("Flash dump, loaded if present and written back afterwards")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("pages")
                .long("pages")
                .value_name("N")
                .help("Number of flash pages")
                .default_value("4096"),
        )
        .arg(
            Arg::with_name("page-size")
                .long("page-size")
                .value_name("BYTES")
                .help("Flash page size, a row is four pages")
                .default_value("64"),
        )
        .arg(
            Arg::with_name("reserved-rows")
                .long("reserved-rows")
                .value_name("N")
                .help("Rows occupied by the bootloader")
                .default_value("288"),
        )
        .arg(
            Arg::with_name("verify")
                .long("verify")
                .help("When checksums are compared")
                .possible_values(&["per-row", "last-row"])
                .default_value("per-row"),
        )
        .arg(
            Arg::with_name("marker")
                .long("marker")
                .value_name("NAME")
                .help("Update marker file")
                .default_value(Config::DEFAULT.marker),
        )
        .arg(
            Arg::with_name("image")
                .long("image")
                .value_name("NAME")
                .help("Firmware image file")
                .default_value(Config::DEFAULT.image),
        )
        .get_matches();

    let geometry = Geometry {
        page_size: value_t!(matches, "page-size", u32).unwrap_or_else(|e| e.exit()),
        pages: value_t!(matches, "pages", u32).unwrap_or_else(|e| e.exit()),
        pages_per_row: 4,
    };
    let reserved_rows = value_t!(matches, "reserved-rows", u32).unwrap_or_else(|e| e.exit());
    let verify = match matches.value_of("verify") {
        Some("last-row") => Verify::LastRow,
        _ => Verify::PerRow,
    };
    let config = Config::DEFAULT
        .with_files(
            matches.value_of("marker").unwrap_or(Config::DEFAULT.marker),
            matches.value_of("image").unwrap_or(Config::DEFAULT.image),
        )
        .with_reserved_rows(reserved_rows)
        .with_verify(verify);
    let card = matches.value_of("card").unwrap_or(".");
    let dump = matches.value_of("flash");

    let mut flash = SimFlash::new(geometry);
    if let Some(path) = dump.filter(|path| Path::new(path).exists()) {
        if let Err(e) = File::open(path).and_then(|mut file| flash.load(&mut file)) {
            error!("cannot load flash dump {}: {}", path, e);
            process::exit(2);
        }
    }

    let mut bootloader: Bootloader<_, _, _> =
        Bootloader::new(flash, DirStorage::new(card), SoftwareCrc, config);
    let result = bootloader.run();
    let state = bootloader.state();
    let (mut flash, _, _) = bootloader.release();

    if let Some(path) = dump {
        if let Err(e) = File::create(path).and_then(|mut file| flash.save(&mut file)) {
            error!("cannot write flash dump {}: {}", path, e);
        }
    }

    let app = match result {
        Ok(app) => app,
        Err(e) => {
            println!("Boot halted in {:?}: {}", state, e);
            process::exit(1);
        }
    };

    match app.report() {
        Some(report) => println!(
            "Updated: {} bytes in {} rows ({} rows erased), checksum {:#010x}",
            report.image_len, report.rows_written, report.rows_erased, report.checksums.flash
        ),
        None => println!("No update requested"),
    }
    match VectorTable::read(&mut flash, app.base()) {
        Ok(table) if table.is_erased() => {
            println!("Handoff to {:#x}: no application present", app.base())
        }
        Ok(table) => println!(
            "Handoff to {:#x} (VTOR {:#x}): sp {:#010x}, reset {:#010x}",
            app.base(),
            app.vector_table_offset(),
            table.initial_sp,
            table.reset_vector
        ),
        Err(e) => println!("Handoff to {:#x}: cannot read vector table: {:?}", app.base(), e),
    }
}
