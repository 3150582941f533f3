/*
This file is part of the Roof Detection Tool
Copyright (C) 2022 Novel-T

The Roof Detection Tool is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <http://www.gnu.org/licenses/>.
*/
use anyhow::{Context, Result};
use log::{info, LevelFilter};
use roof_det::datatypes::{
    BuildingResult, RoofDetBuilding, RoofDetParams, RoofPolygonRecord,
};
use roof_det::detect_roofs::{detect_roofs, roof_det_cpu_count};
use geo_util::util::format_duration;
use simple_logger::SimpleLogger;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;
use structopt::StructOpt;

#[derive(StructOpt)]
struct Cli {
    #[structopt(long, default_value = "Warn")]
    log_level: LevelFilter,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(StructOpt)]
enum Command {
    #[structopt(help = "Detect the roof planes of every building json in a directory")]
    DetectRoofs(DetectRoofsArgs),
}

#[derive(StructOpt)]
pub struct DetectRoofsArgs {
    #[structopt(parse(from_os_str), long, help = "Directory of per-building json files")]
    input_dir: PathBuf,

    #[structopt(parse(from_os_str), long, help = "Output path, one json record per roof plane")]
    output: PathBuf,

    #[structopt(parse(from_os_str), long, help = "Optional csv summary of the planes")]
    summary_csv: Option<PathBuf>,

    #[structopt(long, default_value = "1.0")]
    resolution_metres: f64,

    #[structopt(long, default_value = "0")]
    seed: u64,

    #[structopt(long, default_value = "80")]
    max_roof_slope_degrees: f64,

    #[structopt(long, default_value = "10")]
    min_roof_area_m: f64,

    #[structopt(long, default_value = "45")]
    min_roof_degrees_from_north: f64,

    #[structopt(long, default_value = "10")]
    flat_roof_degrees: f64,

    #[structopt(long, default_value = "0.3")]
    min_dist_to_edge_m: f64,

    #[structopt(long, default_value = "50")]
    batch_size: usize,
}

fn load_buildings(input_dir: &PathBuf) -> Result<Vec<RoofDetBuilding>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(input_dir)
        .with_context(|| format!("reading {:?}", input_dir))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
        .collect();
    paths.sort();

    let mut buildings = Vec::with_capacity(paths.len());
    for path in paths {
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {:?}", &path))?;
        buildings.push(
            RoofDetBuilding::from_json_str(&json)
                .with_context(|| format!("parsing {:?}", &path))?,
        );
    }
    Ok(buildings)
}

fn write_outputs(args: &DetectRoofsArgs, results: &[BuildingResult]) -> Result<()> {
    let out = File::create(&args.output)
        .with_context(|| format!("creating {:?}", &args.output))?;
    let mut out = BufWriter::new(out);

    let mut csv_writer = match &args.summary_csv {
        Some(path) => Some(
            csv::Writer::from_path(path).with_context(|| format!("creating {:?}", path))?,
        ),
        None => None,
    };
    if let Some(w) = csv_writer.as_mut() {
        w.write_record([
            "toid",
            "plane_id",
            "plane_type",
            "slope",
            "aspect",
            "is_flat",
            "usable",
            "not_usable_reason",
            "exclusion_reason",
        ])?;
    }

    for result in results {
        for rp in &result.roof_polygons {
            let record = RoofPolygonRecord::from_roof_polygon(rp);
            serde_json::to_writer(&mut out, &record)?;
            out.write_all(b"\n")?;

            if let Some(w) = csv_writer.as_mut() {
                let row: Vec<String> = vec![
                    record.toid.clone(),
                    record.plane_id.clone(),
                    record.plane_type.clone(),
                    format!("{:.2}", record.slope),
                    format!("{:.0}", record.aspect),
                    record.is_flat.to_string(),
                    record.usable.to_string(),
                    record
                        .not_usable_reason
                        .map(|r| format!("{:?}", r).to_uppercase())
                        .unwrap_or_default(),
                    String::new(),
                ];
                w.write_record(&row)?;
            }
        }
        if result.roof_polygons.is_empty() {
            if let Some(w) = csv_writer.as_mut() {
                let mut row = vec![result.toid.clone()];
                row.extend(std::iter::repeat(String::new()).take(7));
                row.push(result.exclusion_reason.clone().unwrap_or_default());
                w.write_record(&row)?;
            }
        }
    }

    if let Some(w) = csv_writer.as_mut() {
        w.flush()?;
    }
    Ok(())
}

fn run_detect_roofs(args: &DetectRoofsArgs) -> Result<()> {
    let params = RoofDetParams {
        max_roof_slope_degrees: args.max_roof_slope_degrees,
        min_roof_area_m: args.min_roof_area_m,
        min_roof_degrees_from_north: args.min_roof_degrees_from_north,
        flat_roof_degrees: args.flat_roof_degrees,
        min_dist_to_edge_m: args.min_dist_to_edge_m,
        resolution_metres: args.resolution_metres,
        ransac_seed: args.seed,
    };

    let buildings = load_buildings(&args.input_dir)?;
    info!("loaded {} buildings", buildings.len());

    let workers = roof_det_cpu_count();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()?;
    info!("using {} workers for roof plane detection", workers);

    let start = Instant::now();
    let mut results = Vec::with_capacity(buildings.len());
    for (batch_idx, batch) in buildings.chunks(args.batch_size.max(1)).enumerate() {
        let batch_start = Instant::now();
        let batch_results = pool.install(|| detect_roofs(batch, &params));
        results.extend(batch_results);
        info!(
            "batch {} of {} buildings took {}",
            batch_idx,
            batch.len(),
            format_duration(batch_start.elapsed())
        );
    }

    write_outputs(args, &results)?;

    info!(
        "roof plane detection for {} buildings took {}",
        buildings.len(),
        format_duration(start.elapsed())
    );
    Ok(())
}

fn run() -> Result<()> {
    let args = Cli::from_args();

    SimpleLogger::new().with_level(args.log_level).init()?;

    match &args.cmd {
        Command::DetectRoofs(r) => {
            run_detect_roofs(r)?;
        }
    }

    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
