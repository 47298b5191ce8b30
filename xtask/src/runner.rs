//! Test runner: build, run in QEMU, decode UART0, compare against expected.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::build::{build_example, project_root};
use crate::defmt;
use crate::qemu::run_qemu;

/// How the UART0 capture of an example is turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestMode {
    /// The transport carried plain text.
    Text,
    /// The transport carried defmt frames.
    Defmt,
}

/// Options for running an example.
pub struct RunOptions {
    /// Print verbose output (for `qemu` command).
    pub verbose: bool,
    /// Update expected files instead of comparing (for `test --bless`).
    pub bless: bool,
    /// Build in release mode.
    pub release: bool,
}

/// Detect test mode from file header.
///
/// Looks for `@test-mode: <mode>` in the first few lines.
fn detect_test_mode(example_path: &Path) -> TestMode {
    if let Ok(content) = fs::read_to_string(example_path) {
        for line in content.lines().take(10) {
            if let Some(mode) = line.strip_prefix("//! @test-mode:") {
                if mode.trim() == "defmt" {
                    return TestMode::Defmt;
                }
            }
        }
    }
    TestMode::Text
}

/// Run an example with the given options.
///
/// Returns `Ok(true)` if the test passed, `Ok(false)` if it failed.
pub fn run_example(example: &str, opts: &RunOptions) -> Result<bool> {
    let root = project_root()?;
    let example_path = root
        .join("testsuite")
        .join("examples")
        .join(format!("{example}.rs"));
    let test_mode = detect_test_mode(&example_path);

    println!("Building '{example}'...");
    let elf_path = build_example(example, opts.release)?;

    println!("Running in QEMU...");
    let output = run_qemu(&elf_path)?;
    let semihosting = String::from_utf8_lossy(&output.semihosting);
    let uart0 = match test_mode {
        TestMode::Text => String::from_utf8_lossy(&output.uart0).into_owned(),
        TestMode::Defmt => defmt::decode_output(&elf_path, &output.uart0)?,
    };

    if opts.verbose {
        println!("--- uart ---");
        print!("{uart0}");
        println!("--- semihosting ---");
        print!("{semihosting}");
        println!("--- QEMU run end ---");
        return Ok(true);
    }

    let expected_path = root
        .join("testsuite")
        .join("expected")
        .join(format!("{example}.expected"));

    if opts.bless {
        let status = if expected_path.exists() {
            let existing = fs::read_to_string(&expected_path)?;
            if existing == uart0 {
                "No change"
            } else {
                fs::write(&expected_path, &uart0)?;
                "Updated"
            }
        } else {
            let dir = expected_path
                .parent()
                .context("expected file has no parent directory")?;
            fs::create_dir_all(dir)?;
            fs::write(&expected_path, &uart0)?;
            "Created"
        };
        println!("  {example}.expected: {status}");
        Ok(true)
    } else if expected_path.exists() {
        let expected = fs::read_to_string(&expected_path)?;
        if uart0 == expected {
            println!("  PASS");
            Ok(true)
        } else {
            println!("  FAIL: output differs from expected");
            println!("--- expected ---");
            print!("{expected}");
            println!("--- uart ---");
            print!("{uart0}");
            println!("--- semihosting ---");
            print!("{semihosting}");
            Ok(false)
        }
    } else {
        println!("  No expected output file, run with --bless to create");
        println!("--- output ---");
        print!("{uart0}");
        Ok(false)
    }
}
