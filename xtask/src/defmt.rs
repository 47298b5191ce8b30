use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use defmt_decoder::{DecodeError, Frame, Locations, Table};

/// Decodes a raw defmt stream captured from the UART into one line per frame.
///
/// A transfer overwritten after a gate timeout shows up as a malformed frame. The
/// rzcobs decoder resynchronizes on the next frame delimiter, so the damage is
/// reported inline instead of aborting.
pub fn decode_output(elf_path: &Path, raw_output: &[u8]) -> Result<String> {
    let elf_data = fs::read(elf_path).context("Failed to read ELF file")?;
    let table = Table::parse(&elf_data)
        .context("Failed to parse defmt table from ELF")?
        .ok_or_else(|| anyhow::anyhow!("No defmt data found in ELF"))?;

    let locs = table.get_locations(&elf_data).ok();
    let locs = locs.as_ref();

    let mut decoder = table.new_stream_decoder();
    decoder.received(raw_output);

    let mut output = String::new();
    let mut malformed = 0;

    loop {
        match decoder.decode() {
            Ok(frame) => {
                output.push_str(&format_frame(&frame, locs));
                output.push('\n');
            }
            Err(DecodeError::UnexpectedEof) => break,
            Err(DecodeError::Malformed) => {
                malformed += 1;
                if malformed > raw_output.len() {
                    bail!("defmt decoder stopped making progress");
                }
                output.push_str("<malformed frame>\n");
            }
        }
    }

    Ok(output)
}

fn format_frame(frame: &Frame, locs: Option<&Locations>) -> String {
    let level = frame
        .level()
        .map(|l| l.as_str())
        .unwrap_or("print")
        .to_uppercase();

    let loc = locs.and_then(|locs| locs.get(&frame.index())).map(|loc| {
        let filename = loc
            .file
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| loc.file.display().to_string());
        format!("{filename}:{}", loc.line)
    });

    match loc {
        Some(loc) => format!("{loc}: [{level:<5}] {}", frame.display_message()),
        None => format!("[{level:<5}] {}", frame.display_message()),
    }
}
