use std::time::Instant;

use anyhow::Result;
use cacbin::index::CellIndex;
use cacbin::output;
use cacbin::settings;
use cacbin::system::SyntheticSystem;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

fn main() -> Result<()> {
    env_logger::init();

    let settings = settings::load_config()?;
    info!("{}", settings);

    let mut system = SyntheticSystem::build(&settings)?;
    let mut index = CellIndex::new(&settings)?;

    let steps = settings.system.steps;
    let pb = ProgressBar::new(steps);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bar:40.green/blue} {pos:>5}/{len:5} {msg} ETA: {eta_precise}",
        )?
        .progress_chars("█▇▆▅▄▃▂▁"),
    );
    pb.set_message("step".to_string());

    let start = Instant::now();
    let mut last = None;
    let mut rebuilds = 0;
    for step in 0..steps {
        if index.is_due(step) {
            let summary = index.rebuild_at(step, system.domain(), system.entities())?;
            pb.println(format!(
                "step {}: {} entities, {} quadrature points, {} occupied cells",
                step, summary.entities, summary.quadrature_points, summary.occupancy.occupied_cells
            ));
            last = Some(summary);
            rebuilds += 1;
        }
        system.advance()?;
        pb.inc(1);
    }
    pb.finish_and_clear();

    println!(
        "Time taken: {:.2?} for {} rebuilds over {} steps",
        start.elapsed(),
        rebuilds,
        steps
    );

    if let Some(summary) = last {
        println!("{}", summary);
        if let Some(path) = &settings.output {
            output::write_summary(path, &summary)?;
            info!("wrote summary to {}", path);
        }
    }

    Ok(())
}
