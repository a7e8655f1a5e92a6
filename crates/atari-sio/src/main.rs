//! Atari SIO command-line tool.
//!
//! Mounts disk images and tapes the way the emulator does and reports what
//! the computer would see: drive status, geometry, sector contents and the
//! tape block list.

use std::path::PathBuf;
use std::process;

use atari_sio::patch::{DAUX1, DBUF, DBYT, DCOMND, DDEVIC, DUNIT};
use atari_sio::{MAX_DRIVES, PatchOutcome, ResultCode, Sio, SioConfig, UnitStatus};
use emu_core::{Bus, FlatRam};

/// Where `--sector` reads land in the scratch memory.
const DUMP_BUFFER: u16 = 0x2000;

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

struct CliArgs {
    disks: Vec<PathBuf>,
    read_only: bool,
    drive: u8,
    sector: Option<u16>,
    tape_path: Option<PathBuf>,
    json: bool,
    snapshot_path: Option<PathBuf>,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        disks: Vec::new(),
        read_only: false,
        drive: 1,
        sector: None,
        tape_path: None,
        json: false,
        snapshot_path: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--disk" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.disks.push(PathBuf::from(s));
                }
            }
            "--readonly" => {
                cli.read_only = true;
            }
            "--drive" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.drive = s.parse().unwrap_or(1);
                }
            }
            "--sector" => {
                i += 1;
                cli.sector = args.get(i).and_then(|s| s.parse().ok());
            }
            "--tape" => {
                i += 1;
                cli.tape_path = args.get(i).map(PathBuf::from);
            }
            "--json" => {
                cli.json = true;
            }
            "--snapshot" => {
                i += 1;
                cli.snapshot_path = args.get(i).map(PathBuf::from);
            }
            "--help" | "-h" => {
                eprintln!("Usage: atari-sio [OPTIONS]");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --disk <file>        Mount a disk image; repeat for D2:, D3:, ...");
                eprintln!("  --readonly           Mount every disk read-only");
                eprintln!("  --drive <n>          Drive used by --sector [default: 1]");
                eprintln!("  --sector <n>         Read a sector through the SIO patch and dump it");
                eprintln!("  --tape <file>        Insert a CAS or raw tape and list its blocks");
                eprintln!("  --json               Print the report as JSON");
                eprintln!("  --snapshot <file>    Save the bus state as JSON");
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn make_sio(cli: &CliArgs) -> Sio {
    let mut sio = Sio::new(SioConfig::default());
    if cli.disks.len() > MAX_DRIVES {
        eprintln!("At most {MAX_DRIVES} disks can be mounted");
        process::exit(1);
    }
    for (index, path) in cli.disks.iter().enumerate() {
        let drive = index as u8 + 1;
        if let Err(e) = sio.drives_mut().mount(drive, path, cli.read_only) {
            eprintln!("D{drive}: {}: {e}", path.display());
            process::exit(1);
        }
    }
    if let Some(ref path) = cli.tape_path
        && let Err(e) = sio.cassette_mut().insert(path)
    {
        eprintln!("Tape {}: {e}", path.display());
        process::exit(1);
    }
    sio
}

/// Read one sector the way the OS would and return its bytes.
fn read_sector(sio: &mut Sio, drive: u8, sector: u16) -> Result<Vec<u8>, ResultCode> {
    let size = sio.drives().size_and_offset(drive, sector).0;
    let mut ram = FlatRam::new();
    ram.write(DDEVIC, 0x31);
    ram.write(DUNIT, drive);
    ram.write(DCOMND, 0x52);
    ram.write_block(DBUF, &DUMP_BUFFER.to_le_bytes());
    ram.write_block(DBYT, &(size as u16).to_le_bytes());
    ram.write_block(DAUX1, &sector.to_le_bytes());

    // Held-back reads complete after enough scanlines have gone by.
    let mut ypos: u16 = 0;
    let result = loop {
        match sio.sio_patch(&mut ram, ypos) {
            PatchOutcome::Complete(result) => break result,
            PatchOutcome::Retry => ypos = (ypos + 1) % 312,
        }
    };
    if result.code != ResultCode::Complete {
        return Err(result.code);
    }
    let mut data = vec![0; size];
    ram.read_block(DUMP_BUFFER, &mut data);
    Ok(data)
}

fn hex_dump(data: &[u8]) {
    for (row, chunk) in data.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02X}")).collect();
        let text: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        println!("{:04X}  {:<47}  {text}", row * 16, hex.join(" "));
    }
}

fn print_report(sio: &Sio) {
    for drive in 1..=MAX_DRIVES as u8 {
        let Some(unit) = sio.drives().unit(drive) else {
            continue;
        };
        let Some(path) = unit.path() else {
            continue;
        };
        println!(
            "D{drive}: {} ({:?}, {} sectors of {} bytes{})",
            path.display(),
            unit.status(),
            unit.sector_count(),
            unit.sector_size(),
            if unit.is_compressed() { ", compressed" } else { "" }
        );
        if let Ok(block) = sio.drives().read_status_block(drive) {
            let hex: Vec<String> = block.iter().map(|b| format!("{b:02X}")).collect();
            println!("    status block {}", hex.join(" "));
        }
    }

    let deck = sio.cassette();
    if let Some(path) = deck.path() {
        println!(
            "C: {} ({}, {} blocks) \"{}\"",
            path.display(),
            if deck.is_cas() { "CAS" } else { "raw" },
            deck.max_block(),
            deck.description()
        );
        for (index, block) in deck.blocks().iter().enumerate() {
            println!(
                "    {:4}  {:5} bytes  {:4} baud  gap {:5} ms",
                index + 1,
                block.length,
                block.baud,
                block.gap_ms
            );
        }
    }
}

fn json_report(sio: &Sio) -> serde_json::Value {
    let drives: Vec<serde_json::Value> = (1..=MAX_DRIVES as u8)
        .filter_map(|drive| {
            let unit = sio.drives().unit(drive)?;
            if unit.status() == UnitStatus::Off {
                return None;
            }
            Some(serde_json::json!({
                "drive": drive,
                "status": unit.status(),
                "path": unit.path(),
                "sector_size": unit.sector_size(),
                "sector_count": unit.sector_count(),
                "compressed": unit.is_compressed(),
                "drive_status": sio.drives().drive_status(drive).ok(),
            }))
        })
        .collect();

    let deck = sio.cassette();
    let blocks: Vec<serde_json::Value> = deck
        .blocks()
        .iter()
        .map(|block| {
            serde_json::json!({
                "length": block.length,
                "baud": block.baud,
                "gap_ms": block.gap_ms,
            })
        })
        .collect();

    serde_json::json!({
        "drives": drives,
        "cassette": {
            "path": deck.path(),
            "status": deck.status(),
            "description": deck.description(),
            "blocks": deck.max_block(),
            "records": blocks,
        },
    })
}

fn main() {
    env_logger::init();
    let cli = parse_args();
    let mut sio = make_sio(&cli);

    if let Some(sector) = cli.sector {
        match read_sector(&mut sio, cli.drive, sector) {
            Ok(data) => hex_dump(&data),
            Err(code) => {
                eprintln!("D{}: sector {sector}: {code:?}", cli.drive);
                process::exit(1);
            }
        }
    } else if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json_report(&sio)).unwrap_or_default()
        );
    } else {
        print_report(&sio);
    }

    if let Some(ref path) = cli.snapshot_path {
        let text = serde_json::to_string_pretty(&sio.snapshot()).unwrap_or_default();
        if let Err(e) = std::fs::write(path, text) {
            eprintln!("Snapshot error: {e}");
            process::exit(1);
        }
        eprintln!("Snapshot saved to {}", path.display());
    }
}
