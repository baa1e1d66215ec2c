use std::time::Duration;

use anyhow::{bail, Result};
use comfy_table::{presets::UTF8_BORDERS_ONLY, Cell, Color, Table};
use human_repr::HumanThroughput;
use tracing::warn;

use hashmill_core::{benchmark, formats, Format, Tuning};

use crate::{Bench, Test};

/// The formats to run: every one, or the one asked for.
fn selected(format: Option<&str>) -> Result<Vec<Box<dyn Format>>> {
    Ok(match format {
        Some(label) => vec![formats::find(label)?],
        None => formats::registry(),
    })
}

/// Runs the self test of the formats.
pub fn self_test(args: Test) -> Result<()> {
    let tuning = Tuning::from_env();

    let mut display_table = Table::new();
    display_table.load_preset(UTF8_BORDERS_ONLY);
    display_table.set_header(vec!["Format", "Algorithm", "Result"]);

    let mut failures = 0;
    for mut format in selected(args.format.as_deref())? {
        let result = format
            .init(&tuning)
            .and_then(|_| hashmill_core::self_test(&mut *format));
        format.done();

        let outcome = match result {
            Ok(()) => Cell::new("PASS").fg(Color::Green),
            Err(err) => {
                failures += 1;
                Cell::new(format!("FAIL: {err}")).fg(Color::Red)
            }
        };

        let params = format.params();
        display_table.add_row(vec![
            Cell::new(params.label),
            Cell::new(&params.algorithm_name),
            outcome,
        ]);
    }

    println!("{display_table}");

    if failures > 0 {
        bail!("{failures} format(s) failed their self test");
    }

    Ok(())
}

/// Measures the speed of the formats.
pub fn bench(args: Bench) -> Result<()> {
    let tuning = Tuning::from_env();
    let duration = Duration::from_secs(args.seconds);

    let mut display_table = Table::new();
    display_table.load_preset(UTF8_BORDERS_ONLY);
    display_table.set_header(vec!["Format", "Algorithm", "Keys per crypt", "Speed"]);

    for mut format in selected(args.format.as_deref())? {
        let result = format
            .init(&tuning)
            .and_then(|_| benchmark(&mut *format, duration));

        let speed = match result {
            Ok(bench) => Cell::new(bench.rate().human_throughput("c")).fg(Color::Green),
            Err(err) => {
                warn!("{} could not be benchmarked: {err}", format.params().label);
                Cell::new("unavailable").fg(Color::Red)
            }
        };
        let keys = format.keys_per_crypt();
        format.done();

        let params = format.params();
        display_table.add_row(vec![
            Cell::new(params.label),
            Cell::new(&params.algorithm_name),
            Cell::new(keys),
            speed,
        ]);
    }

    println!("{display_table}");

    Ok(())
}
