//! Sphere Descent
//!
//! This demo drives the hybrid optimizer on a shifted sphere loss in a
//! single process, checkpoints it, and restarts a fresh optimizer from
//! the saved artifacts.

use adam_cma::prelude::*;

const DIM: usize = 16;
const POPULATION: usize = 12;
const THREADS: usize = 4;

fn loss(x: &[f64]) -> f64 {
    x.iter().map(|v| (v - 1.0).powi(2)).sum()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Adam-CMA Sphere Descent ===\n");

    let config = OptimizerConfig::builder()
        .population_size(POPULATION)
        .dimension(DIM)
        .num_threads(THREADS)
        .learning_rate(0.05)
        .schedule(LearningRateSchedule::InverseTime { rate: 0.001 })
        .seed(42)
        .build()?;

    let mut opt = AdamCmaOptimizer::single_process(config, ParameterVector::zeros(DIM))?;

    let mut header = String::from("gen   | best     ");
    opt.write_headers(&mut header);
    println!("{}", header);

    for gen in 0..200 {
        let mut losses = Vec::with_capacity(POPULATION);
        for i in 0..POPULATION {
            let x = opt.sample(i)?.as_slice().to_vec();
            losses.push(loss(&x));
            // descent direction of the sphere loss
            let direction = x.iter().map(|v| 2.0 * (1.0 - v)).collect();
            opt.gradient_partial_mut(i, i % THREADS)?.replace(direction)?;
        }

        opt.prepare_update(&losses)?;
        opt.apply_update()?;

        if gen % 20 == 0 {
            let best = opt.metrics().best_loss.unwrap_or(f64::NAN);
            let mut line = format!("{:5} | {:8.4}", gen, best);
            opt.write_metrics(&mut line);
            println!("{}", line);
        }
    }

    println!("\nFinal loss at mean: {:.6}", loss(opt.mean().as_slice()));

    let dir = std::env::temp_dir().join("adam_cma_demo");
    std::fs::create_dir_all(&dir)?;
    let prefix = dir.join("sphere");
    opt.save(&prefix, true)?;
    println!("Saved artifacts under {}", dir.display());

    let config = opt.config().clone();
    let mut resumed = AdamCmaOptimizer::single_process(config, ParameterVector::zeros(DIM))?;
    let status = resumed.restart(&prefix)?;
    println!(
        "Restart status: {:?}, loss at restored mean: {:.6}",
        status,
        loss(resumed.mean().as_slice())
    );

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}
