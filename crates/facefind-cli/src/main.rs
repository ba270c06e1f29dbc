use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facefind_core::{CameraDevice, Price, Pricing};
use facefind_hw::{StillImageCamera, V4lCamera};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

// `#[zbus::proxy]` generates `GalleryProxy` for the daemon interface.
#[zbus::proxy(
    interface = "org.facefind.Gallery1",
    default_service = "org.facefind.Gallery1",
    default_path = "/org/facefind/Gallery1"
)]
trait Gallery {
    async fn open_event(&self, event_id: &str) -> zbus::Result<String>;
    async fn open_event_by_slug(&self, slug: &str) -> zbus::Result<String>;
    async fn start_search(&self) -> zbus::Result<()>;
    async fn capture(&self) -> zbus::Result<String>;
    async fn cancel_search(&self) -> zbus::Result<()>;
    async fn visible_photos(&self) -> zbus::Result<String>;
    async fn add_to_cart(&self, photo_id: &str, tier: &str) -> zbus::Result<String>;
    async fn cart(&self) -> zbus::Result<String>;
    async fn clear_cart(&self) -> zbus::Result<()>;
    async fn checkout(&self) -> zbus::Result<String>;
    async fn create_event(&self, operator: &str, name: &str, date: &str, slug: &str) -> zbus::Result<String>;
    async fn set_pricing(&self, event_id: &str, pricing: &str) -> zbus::Result<()>;
    async fn upload_photos(&self, operator: &str, event_id: &str, paths: Vec<String>) -> zbus::Result<String>;
    async fn upload_status(&self) -> zbus::Result<String>;
    async fn list_photos(&self, event_id: &str) -> zbus::Result<String>;
    async fn delete_photo(&self, photo_id: &str, confirmed: bool) -> zbus::Result<()>;
    async fn attach_descriptor(&self, photo_id: &str, values: Vec<f64>) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "facefind", about = "FaceFind event gallery CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an event gallery
    Open {
        /// Event id, or slug with --slug
        event: String,
        #[arg(long)]
        slug: bool,
    },
    /// Find your photos with a selfie
    Search,
    /// Stop a search and show the full gallery
    Cancel,
    /// Show the currently visible photos
    Photos,
    /// Manage the cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// Create events and edit pricing
    Event {
        #[command(subcommand)]
        action: EventAction,
    },
    /// Upload photos into an event
    Upload {
        #[arg(short, long)]
        operator: String,
        event_id: String,
        #[arg(required = true)]
        paths: Vec<String>,
        /// Wait until every file has finished
        #[arg(long)]
        wait: bool,
    },
    /// Show upload progress
    Uploads,
    /// List all photos of an event
    List { event_id: String },
    /// Delete a photo
    Delete {
        photo_id: String,
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Attach a computed face descriptor to a photo
    Descriptor {
        photo_id: String,
        /// Comma-separated values
        values: String,
    },
    /// Show daemon status
    Status,
    /// Run camera diagnostics
    Test {
        #[arg(long, default_value = "/dev/video0")]
        device: String,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// Add a visible photo (tiers: social, print, original, remix_credit)
    Add { photo_id: String, tier: String },
    List,
    Clear,
    Checkout,
}

#[derive(Subcommand)]
enum EventAction {
    Create {
        #[arg(short, long)]
        operator: String,
        #[arg(short, long)]
        name: String,
        /// Event date, YYYY-MM-DD
        #[arg(short, long)]
        date: String,
        #[arg(short, long, default_value = "")]
        slug: String,
    },
    /// Set all four tier prices, in currency units
    Pricing {
        event_id: String,
        #[arg(long)]
        social: f64,
        #[arg(long)]
        print: f64,
        #[arg(long)]
        original: f64,
        #[arg(long)]
        remix_credit: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // Diagnostics bypass the daemon entirely.
    if let Commands::Test { device } = &cli.command {
        return run_test(device).await;
    }

    let conn = match cli.session {
        true => zbus::Connection::session().await,
        false => zbus::Connection::system().await,
    };
    let conn = conn.context("failed to connect to D-Bus")?;
    let proxy = GalleryProxy::new(&conn).await?;

    match cli.command {
        Commands::Open { event, slug } => {
            let snapshot = if slug {
                proxy.open_event_by_slug(&event).await?
            } else {
                proxy.open_event(&event).await?
            };
            print_gallery(&parse(&snapshot)?);
        }
        Commands::Search => run_search(&proxy).await?,
        Commands::Cancel => {
            proxy.cancel_search().await?;
            println!("Search cancelled.");
        }
        Commands::Photos => print_gallery(&parse(&proxy.visible_photos().await?)?),
        Commands::Cart { action } => match action {
            CartAction::Add { photo_id, tier } => {
                let reply = parse(&proxy.add_to_cart(&photo_id, &tier).await?)?;
                if reply["added"].as_bool() == Some(true) {
                    println!("Added to cart.");
                } else {
                    println!("Already in cart.");
                }
                print_cart(&reply["cart"]);
            }
            CartAction::List => print_cart(&parse(&proxy.cart().await?)?),
            CartAction::Clear => {
                proxy.clear_cart().await?;
                println!("Cart cleared.");
            }
            CartAction::Checkout => {
                let receipt = parse(&proxy.checkout().await?)?;
                println!("Checkout complete.");
                print_cart(&receipt);
            }
        },
        Commands::Event { action } => match action {
            EventAction::Create {
                operator,
                name,
                date,
                slug,
            } => {
                let event = parse(&proxy.create_event(&operator, &name, &date, &slug).await?)?;
                println!("Created event {} ({})", event["id"].as_str().unwrap_or("?"), name);
            }
            EventAction::Pricing {
                event_id,
                social,
                print,
                original,
                remix_credit,
            } => {
                let pricing = Pricing {
                    social: cents(social),
                    print: cents(print),
                    original: cents(original),
                    remix_credit: cents(remix_credit),
                };
                proxy.set_pricing(&event_id, &serde_json::to_string(&pricing)?).await?;
                println!("Pricing updated.");
            }
        },
        Commands::Upload {
            operator,
            event_id,
            paths,
            wait,
        } => {
            let paths = paths
                .into_iter()
                .map(|p| {
                    std::fs::canonicalize(&p)
                        .with_context(|| format!("cannot read {p}"))
                        .map(|abs| abs.to_string_lossy().into_owned())
                })
                .collect::<Result<Vec<_>>>()?;
            let ids = parse(&proxy.upload_photos(&operator, &event_id, paths).await?)?;
            let count = ids.as_array().map_or(0, Vec::len);
            println!("Queued {count} file(s).");
            if wait {
                wait_for_uploads(&proxy).await?;
            }
        }
        Commands::Uploads => print_uploads(&parse(&proxy.upload_status().await?)?),
        Commands::List { event_id } => {
            let photos = parse(&proxy.list_photos(&event_id).await?)?;
            for photo in photos.as_array().into_iter().flatten() {
                let processed = if photo["descriptor"].is_null() { "pending" } else { "ready" };
                println!(
                    "{}  {}  {:<8} {}",
                    photo["id"].as_str().unwrap_or("?"),
                    photo["status"].as_str().unwrap_or("?"),
                    processed,
                    photo["display_url"].as_str().unwrap_or("")
                );
            }
        }
        Commands::Delete { photo_id, yes } => {
            if !yes {
                bail!("refusing to delete {photo_id} without --yes");
            }
            proxy.delete_photo(&photo_id, true).await?;
            println!("Deleted {photo_id}.");
        }
        Commands::Descriptor { photo_id, values } => {
            let values = parse_values(&values)?;
            proxy.attach_descriptor(&photo_id, values).await?;
            println!("Descriptor attached to {photo_id}.");
        }
        Commands::Status => {
            let status = parse(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Test { device } => run_test(&device).await?,
    }

    Ok(())
}

/// Start the camera and capture until a face is found; each retry waits for the user.
async fn run_search(proxy: &GalleryProxy<'_>) -> Result<()> {
    proxy.start_search().await?;
    println!("Camera on. Look at the camera and press Enter to capture.");
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        if !confirm(&mut stdin).await? {
            proxy.cancel_search().await?;
            println!("Search cancelled.");
            return Ok(());
        }
        let report = parse(&proxy.capture().await?)?;
        match report["outcome"].as_str() {
            Some("no_face") => {
                println!("{} (Enter to retry, q to cancel)", report["notice"].as_str().unwrap_or(""));
            }
            _ => {
                if let Some(notice) = report["notice"].as_str() {
                    println!("{notice}");
                }
                println!("Showing {} photo(s).", report["shown"]);
                return Ok(());
            }
        }
    }
}

async fn confirm<R: tokio::io::AsyncBufRead + Unpin>(lines: &mut tokio::io::Lines<R>) -> Result<bool> {
    let line = lines.next_line().await?;
    Ok(matches!(line, Some(l) if !l.trim().eq_ignore_ascii_case("q")))
}

async fn wait_for_uploads(proxy: &GalleryProxy<'_>) -> Result<()> {
    loop {
        let entries = parse(&proxy.upload_status().await?)?;
        let pending = entries
            .as_array()
            .into_iter()
            .flatten()
            .filter(|e| e["state"]["state"] == "uploading")
            .count();
        if pending == 0 {
            print_uploads(&entries);
            return Ok(());
        }
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    }
}

async fn run_test(device: &str) -> Result<()> {
    println!("Running camera diagnostics...");
    let devices = V4lCamera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found.");
    }
    for d in &devices {
        println!("  {}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }

    let mut camera: Box<dyn CameraDevice> = if StillImageCamera::handles(device) {
        Box::new(StillImageCamera::new(device))
    } else {
        Box::new(V4lCamera::new(device, 4))
    };
    camera.acquire().await.with_context(|| format!("cannot open {device}"))?;
    let frame = camera.grab_frame().await;
    camera.release();
    let frame = frame?;

    let mean = frame.data.iter().map(|&p| p as u64).sum::<u64>() / frame.data.len().max(1) as u64;
    println!(
        "Captured frame {} from {device}: {}x{}, mean brightness {mean}",
        frame.sequence, frame.width, frame.height
    );
    Ok(())
}

fn parse(json: &str) -> Result<Value> {
    serde_json::from_str(json).context("daemon returned invalid JSON")
}

fn parse_values(raw: &str) -> Result<Vec<f64>> {
    raw.split(',')
        .map(|v| v.trim().parse::<f64>().with_context(|| format!("invalid value {v:?}")))
        .collect()
}

fn cents(amount: f64) -> Price {
    Price((amount.max(0.0) * 100.0).round() as u64)
}

fn money(cents: &Value) -> String {
    Price(cents.as_u64().unwrap_or(0)).to_string()
}

fn print_gallery(snapshot: &Value) {
    let event = &snapshot["event"];
    println!(
        "{} ({})",
        event["name"].as_str().unwrap_or("?"),
        event["date"].as_str().unwrap_or("?")
    );
    if let Some(notice) = snapshot["notice"].as_str() {
        println!("{notice}");
    }
    for photo in snapshot["photos"].as_array().into_iter().flatten() {
        println!(
            "  {}  {}",
            photo["id"].as_str().unwrap_or("?"),
            photo["display_url"].as_str().unwrap_or("")
        );
    }
}

fn print_cart(cart: &Value) {
    for item in cart["items"].as_array().into_iter().flatten() {
        println!(
            "  {}  {:<16} {}",
            item["photo_id"].as_str().unwrap_or("?"),
            item["label"].as_str().unwrap_or("?"),
            money(&item["unit_price"])
        );
    }
    println!("Total: {}", money(&cart["total"]));
}

fn print_uploads(entries: &Value) {
    for entry in entries.as_array().into_iter().flatten() {
        let state = &entry["state"];
        let detail = match state["state"].as_str() {
            Some("success") => state["photo_id"].as_str().unwrap_or("").to_string(),
            Some("error") => state["message"].as_str().unwrap_or("").to_string(),
            _ => String::new(),
        };
        println!(
            "  {:<12} {}  {}",
            state["state"].as_str().unwrap_or("?"),
            entry["file_name"].as_str().unwrap_or("?"),
            detail
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_values() {
        assert_eq!(parse_values("0.5, -1,2").unwrap(), vec![0.5, -1.0, 2.0]);
        assert!(parse_values("0.5,abc").is_err());
    }

    #[test]
    fn test_money_formatting() {
        assert_eq!(cents(9.99), Price(999));
        assert_eq!(money(&serde_json::json!(1999)), "19.99");
    }

    #[test]
    fn test_cli_parses_delete_confirmation() {
        let cli = Cli::try_parse_from(["facefind", "delete", "p1", "--yes"]).unwrap();
        assert!(matches!(cli.command, Commands::Delete { yes: true, .. }));
    }

    #[tokio::test]
    async fn test_confirm_reads_retry_or_quit() {
        let input: &[u8] = b"\nq\n";
        let mut lines = BufReader::new(input).lines();
        assert!(confirm(&mut lines).await.unwrap());
        assert!(!confirm(&mut lines).await.unwrap());
        assert!(!confirm(&mut lines).await.unwrap());
    }
}
