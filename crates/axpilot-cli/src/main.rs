//! axpilot CLI, driver and target server entry point.

mod args;
mod config;
mod daemon;
mod driver;
mod host;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use axpilot_core::command::BatchOutcome;
use axpilot_core::executor::InputBackend;
use axpilot_core::geometry::{Point, Rectangle};
use axpilot_core::session::{Session, SessionConfig};
use axpilot_core::tree::{FixtureTree, UiTree};
use axpilot_core::vision::{ImageMatch, ScreenCapture};
use clap::Parser;
use serde_json::json;
use tracing::{error, info};

use crate::args::{Cli, Commands, DriverArgs, ImageArgs, ServeArgs};
use crate::daemon::{TargetClient, TargetServer};
use crate::driver::{Driver, PercentRegion, Polling};

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    // Serve runs the target, all other commands are driver calls
    if let Commands::Serve(args) = cli.command {
        run_serve(args);
        return;
    }

    if let Err(e) = run_driver_command(cli.command) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn driver_args(command: &Commands) -> Option<&DriverArgs> {
    match command {
        Commands::Serve(_) => None,
        Commands::Resolve(a) | Commands::Click(a) | Commands::RightClick(a) => Some(&a.driver),
        Commands::WaitFor(a) => Some(&a.driver),
        Commands::Region(a) => Some(a),
        Commands::Screenshot(a) => Some(&a.driver),
        Commands::SetText(a) => Some(&a.driver),
        Commands::InputText(a) => Some(&a.driver),
        Commands::SelectCombo(a) => Some(&a.driver),
        Commands::Drag(a) => Some(&a.driver),
        Commands::DragPercent(a) => Some(&a.driver),
        Commands::Hotkey(a) => Some(&a.driver),
        Commands::Scroll(a) => Some(&a.driver),
        Commands::Move(a) => Some(&a.driver),
        Commands::FindImage(a) => Some(&a.image.driver),
        Commands::ClickImage(a) => Some(&a.image.driver),
        Commands::DoubleClickImage(a) => Some(&a.driver),
    }
}

fn polling(wait_ms: u64, interval_ms: u64) -> Polling {
    if wait_ms == 0 {
        return Polling::ONCE;
    }
    Polling::new(Duration::from_millis(wait_ms), Duration::from_millis(interval_ms))
}

fn image_polling(args: &ImageArgs) -> Polling {
    polling(args.wait_ms, args.interval_ms)
}

fn percent_region([x0, y0, x1, y1]: [f64; 4]) -> PercentRegion {
    PercentRegion {
        start: (x0, y0),
        end: (x1, y1),
    }
}

/// What a driver command produced, printed as JSON.
enum Output {
    Value(serde_json::Value),
    Batch(BatchOutcome),
}

fn match_json(found: Option<ImageMatch>) -> serde_json::Value {
    match found {
        Some(m) => json!({
            "found": true,
            "region": m.rect.to_array(),
            "center": m.rect.center(),
            "confidence": m.confidence,
        }),
        None => json!({ "found": false }),
    }
}

fn read_reference(path: &std::path::Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read reference image {}", path.display()))
}

/// Run one driver command against the target.
fn run_driver_command(command: Commands) -> Result<()> {
    let Some(options) = driver_args(&command).cloned() else {
        bail!("not a driver command");
    };

    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        let client = TargetClient::new(
            config::target(options.target.clone()),
            config::request_timeout(options.timeout_ms),
        )
        .with_settle(config::settle(options.settle_ms));
        let mut driver = Driver::new(client);
        if let Some(capacity) = options.cache {
            driver = driver.with_cache(capacity);
        }

        let result = dispatch_command(&mut driver, command).await;

        if let Some(path) = &options.history {
            driver.export_history(path)?;
        }
        if let Err(e) = driver.disconnect().await {
            tracing::warn!("Disconnect failed: {:#}", e);
        }

        match result? {
            Output::Value(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            Output::Batch(outcome) => {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
                if !outcome.success() {
                    bail!(
                        "{} of {} commands failed",
                        outcome.failed_count(),
                        outcome.results.len()
                    );
                }
            }
        }
        Ok(())
    })
}

async fn dispatch_command(driver: &mut Driver, command: Commands) -> Result<Output> {
    let output = match command {
        Commands::Serve(_) => bail!("serve is not a driver command"),
        Commands::Resolve(a) => {
            let found = driver.resolve(&a.element.element_path()).await?;
            Output::Value(serde_json::to_value(found)?)
        }
        Commands::WaitFor(a) => {
            let found = driver
                .wait_for_element(&a.element.element_path(), polling(a.wait_ms, a.interval_ms))
                .await?;
            Output::Value(serde_json::to_value(found)?)
        }
        Commands::Region(_) => {
            let region = driver.client_mut().app_region().await?;
            Output::Value(json!({ "region": region.to_array() }))
        }
        Commands::Screenshot(a) => {
            let png = driver
                .client_mut()
                .screenshot(a.region.map(Rectangle::from_array))
                .await?;
            std::fs::write(&a.output, &png)
                .with_context(|| format!("Failed to write {}", a.output.display()))?;
            Output::Value(json!({ "path": a.output, "size": png.len() }))
        }
        Commands::Click(a) => Output::Batch(driver.click(&a.element.element_path()).await?),
        Commands::RightClick(a) => {
            Output::Batch(driver.right_click(&a.element.element_path()).await?)
        }
        Commands::SetText(a) => {
            Output::Batch(driver.set_text(&a.element.element_path(), &a.text).await?)
        }
        Commands::InputText(a) => {
            let path = a
                .into
                .as_deref()
                .map(|p| args::element_path(p, a.roles.as_deref()));
            Output::Batch(driver.input_text(path.as_ref(), &a.text).await?)
        }
        Commands::SelectCombo(a) => Output::Batch(
            driver
                .select_combo_item(&a.combo.element_path(), &a.item)
                .await?,
        ),
        Commands::Drag(a) => match (a.from, a.to, a.item, a.destination) {
            (Some([x0, y0]), Some([x1, y1]), _, _) => {
                Output::Batch(driver.drag(Point::new(x0, y0), Point::new(x1, y1)).await?)
            }
            (_, _, Some(item), Some(destination)) => Output::Batch(
                driver
                    .drag_item_to(
                        &args::element_path(&item, None),
                        &args::element_path(&destination, None),
                    )
                    .await?,
            ),
            _ => bail!("Give two element paths or --from and --to"),
        },
        Commands::DragPercent(a) => Output::Batch(
            driver
                .drag_by_percentage(
                    &a.element.element_path(),
                    (a.start_x, a.start_y),
                    (a.end_x, a.end_y),
                )
                .await?,
        ),
        Commands::Hotkey(a) => Output::Batch(driver.hotkey(&a.keys).await?),
        Commands::Scroll(a) => Output::Batch(driver.scroll(a.clicks).await?),
        Commands::Move(a) => match (a.x, a.y, a.element) {
            (Some(x), Some(y), _) => Output::Batch(driver.move_to(Point::new(x, y)).await?),
            (_, _, Some(path)) => Output::Batch(
                driver
                    .move_to_element_center(&args::element_path(&path, None))
                    .await?,
            ),
            _ => bail!("Give x and y coordinates or --element"),
        },
        Commands::FindImage(a) => {
            let reference = read_reference(&a.image.image)?;
            let wait = image_polling(&a.image);
            let found = match a.percent {
                Some(fractions) => {
                    driver
                        .find_image_in_percentage_region(
                            &reference,
                            percent_region(fractions),
                            a.image.threshold,
                            wait,
                        )
                        .await?
                }
                None => {
                    driver
                        .find_image(
                            &reference,
                            a.region.map(Rectangle::from_array),
                            a.image.threshold,
                            wait,
                        )
                        .await?
                }
            };
            Output::Value(match_json(found))
        }
        Commands::ClickImage(a) => {
            let reference = read_reference(&a.image.image)?;
            let wait = image_polling(&a.image);
            let clicked = match a.percent {
                Some(fractions) => {
                    driver
                        .click_image_in_percentage_region(
                            &reference,
                            percent_region(fractions),
                            a.image.threshold,
                            wait,
                        )
                        .await?
                }
                None => driver.click_image(&reference, a.image.threshold, wait).await?,
            };
            match clicked {
                Some(outcome) => Output::Batch(outcome),
                None => bail!("Reference image not found on screen"),
            }
        }
        Commands::DoubleClickImage(a) => {
            let reference = read_reference(&a.image)?;
            match driver
                .double_click_image(&reference, a.threshold, image_polling(&a))
                .await?
            {
                Some(outcome) => Output::Batch(outcome),
                None => bail!("Reference image not found on screen"),
            }
        }
    };
    Ok(output)
}

/// `host:port`, bracketing IPv6 literals.
fn listen_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

type Backends = (Box<dyn InputBackend + Send>, Box<dyn ScreenCapture + Send>);

#[cfg(feature = "desktop")]
fn desktop_backends() -> Result<Backends> {
    Ok((Box::new(host::DesktopInput), Box::new(host::DesktopScreen)))
}

#[cfg(not(feature = "desktop"))]
fn desktop_backends() -> Result<Backends> {
    bail!("This build has no desktop support; rebuild with --features desktop")
}

fn build_session(args: &ServeArgs) -> Result<Session> {
    let tree: Box<dyn UiTree + Send> = match &args.tree_file {
        Some(path) => Box::new(
            host::FileTree::load(path)
                .with_context(|| format!("Failed to load UI tree from {}", path.display()))?,
        ),
        None => Box::new(FixtureTree::new(Vec::new())),
    };

    let (input, mut screen): Backends = if args.desktop {
        desktop_backends()?
    } else {
        (Box::new(host::DryRunInput), Box::new(host::NoScreen))
    };
    if let Some(path) = &args.screen_image {
        screen = Box::new(host::StaticScreen::load(path)?);
    }

    let mut session = Session::new(
        tree,
        input,
        screen,
        SessionConfig {
            cache_capacity: config::cache_capacity(args.cache_capacity),
            settle: config::settle(args.settle_ms),
        },
    );
    if let Some(app) = &args.app {
        session.bind_application(app)?;
    }
    Ok(session)
}

/// Run the target server with graceful signal handling.
///
/// Handles SIGINT (Ctrl+C) and SIGTERM for clean shutdown.
fn run_serve(args: ServeArgs) {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    runtime.block_on(async {
        let session = match build_session(&args) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to set up session: {:#}", e);
                std::process::exit(1);
            }
        };

        let addr = listen_addr(
            &config::bind_host(args.host.clone()),
            config::port(args.port),
        );
        let server = match TargetServer::bind(&addr, session).await {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to start target server: {:#}", e);
                std::process::exit(1);
            }
        };

        // Run server with signal handling
        tokio::select! {
            result = server.run() => {
                if let Err(e) = result {
                    error!("Server error: {:#}", e);
                    std::process::exit(1);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down gracefully");
            }
            _ = sigterm() => {
                info!("Received SIGTERM, shutting down gracefully");
            }
        }
    });
}

/// Wait for SIGTERM signal (Unix only).
///
/// If signal registration fails, logs a warning and waits indefinitely.
#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(
                "Failed to register SIGTERM handler: {}, server will only respond to SIGINT",
                e
            );
            std::future::pending::<()>().await;
        }
    }
}

/// SIGTERM is not available on non-Unix platforms; use a never-completing future.
#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}
