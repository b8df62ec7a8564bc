//! Crash-input cleansing.
//!
//! Byte-substitution search over a crashing input: every byte that can be
//! replaced with a filler (space or 0xFF) while the subprocess still
//! crashes is committed. What remains is exactly the bytes the crash
//! depends on.

use std::path::Path;

use crate::exec::Command;
use crate::flags::Flags;
use crate::fsutil::{dev_null, file_to_vec, remove_file_quiet, temp_path, write_file};

const REPLACEMENT_BYTES: [u8; 2] = [b' ', 0xff];
const MAX_ATTEMPTS: usize = 5;

pub fn cleanse_crash_input(args: &[String], flags: &Flags, inputs: &[String]) -> i32 {
    let Some(output_file) = &flags.exact_artifact_path else {
        eprintln!(
            "ERROR: -cleanse_crash should be given one input file and -exact_artifact_path"
        );
        std::process::exit(1);
    };
    if inputs.len() != 1 {
        eprintln!(
            "ERROR: -cleanse_crash should be given one input file and -exact_artifact_path"
        );
        std::process::exit(1);
    }
    let input_file = &inputs[0];

    let mut cmd = Command::new(args);
    cmd.remove_flag("cleanse_crash");
    if !cmd.has_argument(input_file) {
        eprintln!("ERROR: the crashing input {input_file} is not among the arguments");
        std::process::exit(1);
    }
    cmd.remove_argument(input_file);

    let tmp_file = temp_path("cleanse-crash", ".repro");
    cmd.add_argument(&tmp_file.to_string_lossy());
    cmd.set_output_file(dev_null());
    cmd.combine_out_and_err();

    let mut unit = match file_to_vec(Path::new(input_file)) {
        Ok(unit) => unit,
        Err(err) => {
            eprintln!("ERROR: failed to read {input_file}: {err}");
            std::process::exit(1);
        }
    };
    let size = unit.len();

    for attempt in 0..MAX_ATTEMPTS {
        let mut changed = false;
        for idx in 0..size {
            eprintln!("CLEANSE[{attempt}]: Trying to replace byte {idx} of {size}");
            let original_byte = unit[idx];
            if REPLACEMENT_BYTES.contains(&original_byte) {
                continue;
            }
            for &new_byte in &REPLACEMENT_BYTES {
                unit[idx] = new_byte;
                if let Err(err) = write_file(&tmp_file, &unit) {
                    eprintln!("ERROR: failed to write {}: {err}", tmp_file.display());
                    std::process::exit(1);
                }
                let exit_code = match cmd.execute() {
                    Ok(code) => code,
                    Err(err) => {
                        remove_file_quiet(&tmp_file);
                        eprintln!("ERROR: {err}");
                        std::process::exit(1);
                    }
                };
                remove_file_quiet(&tmp_file);
                if exit_code == 0 {
                    // The crash went away; this byte matters.
                    unit[idx] = original_byte;
                } else {
                    changed = true;
                    eprintln!("CLEANSE: Replaced byte {idx} with 0x{new_byte:x}");
                    if let Err(err) = write_file(Path::new(output_file), &unit) {
                        eprintln!("ERROR: failed to write {output_file}: {err}");
                        std::process::exit(1);
                    }
                    break;
                }
            }
        }
        if !changed {
            break;
        }
    }
    0
}
