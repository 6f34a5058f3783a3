mod simulation;

use anyhow::{ensure, Result};
use clap::Parser;

#[derive(Parser)]
#[command(name = "trafficgrid")]
#[command(about = "Grid traffic simulation, headless")]
struct Cli {
    /// Number of simulation ticks to run
    #[arg(long, default_value = "1000")]
    ticks: u32,

    /// Time delta per tick in seconds
    #[arg(long, default_value = "0.1")]
    delta: f32,

    /// RNG seed for reproducible runs
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Enable the budget-and-goals layer
    #[arg(long)]
    game: bool,

    /// Print the ASCII map with each summary
    #[arg(long)]
    map: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    ensure!(cli.delta > 0.0, "--delta must be positive");
    ensure!(cli.delta <= 1.0, "--delta above 1s breaks movement timing");

    println!("Running grid traffic simulation...");
    println!("Ticks: {}, Delta: {}s, Seed: {}", cli.ticks, cli.delta, cli.seed);
    println!();

    let mut world = simulation::SimWorld::create_demo_world_with_seed(cli.seed);
    if cli.game {
        world.game_state = Some(simulation::GameState::new());
    }

    println!("Initial state:");
    world.print_summary();
    if cli.map {
        print!("{}", world.draw_map());
    }
    println!();

    // Summaries once per simulated second.
    let ticks_per_second = (1.0 / cli.delta).ceil() as u32;
    let mut tick = 0;
    while tick < cli.ticks {
        let ticks_to_run = ticks_per_second.min(cli.ticks - tick);
        for _ in 0..ticks_to_run {
            tick += 1;
            world.tick(cli.delta);
        }
        println!("--- After tick {} ({:.1}s simulated time) ---", tick, tick as f32 * cli.delta);
        world.print_summary();
        if cli.map {
            print!("{}", world.draw_map());
        }
        println!();
    }

    println!("=== Final State ===");
    world.print_summary();
    if cli.map {
        print!("{}", world.draw_map());
    }
    Ok(())
}
