//! Real-time temperature monitoring example
//!
//! Run with: cargo run --example temperature_monitor
//!
//! Press `p` then Enter to step through the notification periods.

use microbit_temperature_ble::{
    celsius_to_fahrenheit, ObservableState, PeriodSetting, Result, SessionConfig, SessionHandle,
};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (minimal)
    tracing_subscriber::fmt().with_env_filter("warn").init();

    println!("micro:bit Temperature Monitor");
    println!("=============================\n");
    println!("Looking for a micro:bit...\n");

    let session = SessionHandle::with_btleplug(SessionConfig::default()).await?;
    session.connect().await?;

    let mut state = session.state();
    let mut temperatures = session.subscribe_temperatures();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut next_choice = 0;

    println!("Press Ctrl+C to exit.\n");

    // Monitor loop
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\n\nExiting...");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                display_state(&snapshot);
                if snapshot.session.is_idle() && snapshot.last_error.is_some() {
                    break;
                }
            }
            Ok(update) = temperatures.recv() => {
                let celsius = update.temperature.celsius();
                println!(
                    "  {} {:4}°C ({:6.1}°F)",
                    if update.period_blink { "*" } else { " " },
                    celsius,
                    celsius_to_fahrenheit(celsius as f64)
                );
            }
            Ok(Some(line)) = stdin.next_line() => {
                if line.trim() == "p" {
                    let period = PeriodSetting::CHOICES[next_choice % PeriodSetting::CHOICES.len()];
                    next_choice += 1;
                    println!("Setting period to {}", period);
                    if let Err(e) = session.write_temperature_period(period.millis() as u32).await {
                        println!("  {}", e);
                    }
                }
            }
        }
    }

    session.shutdown().await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    Ok(())
}

fn display_state(state: &ObservableState) {
    print!("[{}]", state.session);
    if state.is_scanning {
        print!(" scanning");
    }
    if let Some(name) = &state.peripheral_name {
        print!(" {}", name);
    }
    if let Some(period) = state.period {
        print!(" period {}", period);
    }
    if let Some(error) = &state.last_error {
        print!(" error: {}", error);
    }
    println!();
}
