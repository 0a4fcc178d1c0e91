//! CLI argument parsing with clap derive macros.

use std::path::PathBuf;

use axpilot_core::path::ElementPath;
use clap::{Parser, Subcommand};

/// Remote UI automation over accessibility paths.
///
/// `serve` runs on the machine hosting the application under test. Every
/// other subcommand is a driver call against a running target: elements
/// are named by slash-separated paths, resolved to screen rectangles on
/// the target, and acted on with synthesized pointer and keyboard input.
#[derive(Debug, Parser)]
#[command(name = "axpilot", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the target server on this machine
    #[command(after_help = "\
Examples:
  axpilot serve --tree-file ui.json --app QGIS3     # Fixture tree, dry-run input
  axpilot serve --port 9000 --screen-image shot.png # Serve screenshots from a file
  axpilot serve --desktop                           # Real input (needs the desktop feature)")]
    Serve(ServeArgs),

    /// Resolve an element path to its rectangle
    #[command(after_help = "\
Examples:
  axpilot resolve 'Project Toolbar/New'
  axpilot resolve 'Project Toolbar/New' --role ',push button'")]
    Resolve(ElementArgs),

    /// Poll until an element path resolves
    #[command(after_help = "\
Examples:
  axpilot wait-for 'Layer Properties' --wait-ms 20000
  axpilot wait-for 'Layers/roads' --interval-ms 250")]
    WaitFor(WaitArgs),

    /// Print the bound application's rectangle
    Region(DriverArgs),

    /// Save a PNG screenshot
    Screenshot(ScreenshotArgs),

    /// Left-click an element's center
    Click(ElementArgs),

    /// Right-click an element's center
    RightClick(ElementArgs),

    /// Replace a text field's contents
    SetText(TextArgs),

    /// Type text, optionally focusing an element first
    InputText(InputTextArgs),

    /// Open a combo box and pick an item
    SelectCombo(ComboArgs),

    /// Drag one element onto another, or between two screen points
    #[command(after_help = "\
Examples:
  axpilot drag 'Layers/roads' 'Layers/rivers'
  axpilot drag --from 100,200 --to 400,200")]
    Drag(DragArgs),

    /// Drag between two fractional points of an element
    #[command(after_help = "\
Fractions are relative to the element's rectangle: 0,0 is its top-left
corner and 1,1 its bottom-right.

Examples:
  axpilot drag-percent 'Map Canvas' 0.5 0.5 0.25 0.25")]
    DragPercent(DragPercentArgs),

    /// Press a key combination
    #[command(after_long_help = "\
Supported Keys:
  Single characters, Enter, Tab, Space, Backspace, Delete, Escape,
  Home, End, PageUp, PageDown, Insert, Up, Down, Left, Right, F1-F12
  Modifiers: Ctrl, Alt, Shift, Meta

Examples:
  axpilot hotkey ctrl s                 # Save
  axpilot hotkey ctrl shift Escape")]
    Hotkey(HotkeyArgs),

    /// Scroll the wheel (positive up, negative down)
    Scroll(ScrollArgs),

    /// Move the pointer to absolute coordinates or an element's center
    Move(MoveArgs),

    /// Locate a reference image on screen
    FindImage(FindImageArgs),

    /// Locate a reference image and click its center
    ClickImage(ClickImageArgs),

    /// Locate a reference image and double-click its center
    DoubleClickImage(ImageArgs),
}

#[derive(Debug, clap::Args)]
pub struct ServeArgs {
    /// Interface to listen on [env: AXPILOT_BIND_HOST] [default: 0.0.0.0]
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on [env: AXPILOT_PORT] [default: 8888]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Bind element paths to this application instead of the desktop root
    #[arg(long, value_name = "NAME")]
    pub app: Option<String>,

    /// JSON description of the UI tree, reloaded when it changes
    #[arg(long, value_name = "FILE")]
    pub tree_file: Option<PathBuf>,

    /// PNG served for screenshots and image search
    #[arg(long, value_name = "FILE")]
    pub screen_image: Option<PathBuf>,

    /// Inject real input and capture the real screen
    #[arg(long)]
    pub desktop: bool,

    /// Entries kept in the resolution cache [env: AXPILOT_CACHE_CAPACITY]
    #[arg(long)]
    pub cache_capacity: Option<usize>,

    /// Delay after each primitive in milliseconds [env: AXPILOT_SETTLE_MS]
    #[arg(long, value_name = "MS")]
    pub settle_ms: Option<u64>,
}

/// Connection options shared by every driver subcommand.
#[derive(Debug, Clone, clap::Args)]
pub struct DriverArgs {
    /// Target address [env: AXPILOT_TARGET] [default: 127.0.0.1:8888]
    #[arg(short, long, value_name = "HOST:PORT")]
    pub target: Option<String>,

    /// Response timeout in milliseconds [env: AXPILOT_TIMEOUT_MS]
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Target's delay after each primitive; batch timeouts grow by this
    /// much per primitive [env: AXPILOT_SETTLE_MS] [default: 200]
    #[arg(long, value_name = "MS")]
    pub settle_ms: Option<u64>,

    /// Cache resolved rectangles on the driver, up to N entries
    #[arg(long, value_name = "N")]
    pub cache: Option<usize>,

    /// Write dispatched batches to this file as JSON
    #[arg(long, value_name = "FILE")]
    pub history: Option<PathBuf>,
}

#[derive(Debug, clap::Args)]
pub struct PathArg {
    /// Slash-separated element path, e.g. 'Project Toolbar/New'
    pub path: String,

    /// Role per path segment, comma-separated; leave a slot empty for any role
    #[arg(long = "role", value_name = "ROLES")]
    pub roles: Option<String>,
}

impl PathArg {
    pub fn element_path(&self) -> ElementPath {
        element_path(&self.path, self.roles.as_deref())
    }
}

/// Build an element path from a path string and a comma-separated role list.
pub fn element_path(path: &str, roles: Option<&str>) -> ElementPath {
    let roles: Vec<Option<&str>> = roles
        .map(|r| {
            r.split(',')
                .map(str::trim)
                .map(|role| (!role.is_empty()).then_some(role))
                .collect()
        })
        .unwrap_or_default();
    ElementPath::parse(path, &roles)
}

#[derive(Debug, clap::Args)]
pub struct ElementArgs {
    #[command(flatten)]
    pub element: PathArg,

    #[command(flatten)]
    pub driver: DriverArgs,
}

#[derive(Debug, clap::Args)]
pub struct WaitArgs {
    #[command(flatten)]
    pub element: PathArg,

    /// Give up after this many milliseconds
    #[arg(long, value_name = "MS", default_value_t = 10_000)]
    pub wait_ms: u64,

    /// Delay between attempts in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 1_000)]
    pub interval_ms: u64,

    #[command(flatten)]
    pub driver: DriverArgs,
}

#[derive(Debug, clap::Args)]
pub struct ScreenshotArgs {
    /// File to write the PNG to
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Region as x,y,width,height [default: whole screen]
    #[arg(long, value_parser = parse_region)]
    pub region: Option<[u32; 4]>,

    #[command(flatten)]
    pub driver: DriverArgs,
}

#[derive(Debug, clap::Args)]
pub struct TextArgs {
    #[command(flatten)]
    pub element: PathArg,

    /// Text to type
    pub text: String,

    #[command(flatten)]
    pub driver: DriverArgs,
}

#[derive(Debug, clap::Args)]
pub struct InputTextArgs {
    /// Text to type
    pub text: String,

    /// Element to click before typing
    #[arg(long, value_name = "PATH")]
    pub into: Option<String>,

    /// Roles for --into, comma-separated
    #[arg(long = "role", value_name = "ROLES", requires = "into")]
    pub roles: Option<String>,

    #[command(flatten)]
    pub driver: DriverArgs,
}

#[derive(Debug, clap::Args)]
pub struct ComboArgs {
    #[command(flatten)]
    pub combo: PathArg,

    /// Item name inside the combo box
    pub item: String,

    #[command(flatten)]
    pub driver: DriverArgs,
}

#[derive(Debug, clap::Args)]
pub struct DragArgs {
    /// Element to drag
    #[arg(required_unless_present = "from", requires = "destination")]
    pub item: Option<String>,

    /// Element to drop onto
    pub destination: Option<String>,

    /// Start point as x,y, instead of elements
    #[arg(long, value_parser = parse_point, requires = "to", conflicts_with = "item")]
    pub from: Option<[u32; 2]>,

    /// End point as x,y
    #[arg(long, value_parser = parse_point, requires = "from")]
    pub to: Option<[u32; 2]>,

    #[command(flatten)]
    pub driver: DriverArgs,
}

#[derive(Debug, clap::Args)]
pub struct DragPercentArgs {
    #[command(flatten)]
    pub element: PathArg,

    pub start_x: f64,
    pub start_y: f64,
    pub end_x: f64,
    pub end_y: f64,

    #[command(flatten)]
    pub driver: DriverArgs,
}

#[derive(Debug, clap::Args)]
pub struct HotkeyArgs {
    /// Keys held together, last one tapped
    #[arg(required = true, num_args = 1..)]
    pub keys: Vec<String>,

    #[command(flatten)]
    pub driver: DriverArgs,
}

#[derive(Debug, clap::Args)]
pub struct ScrollArgs {
    /// Wheel clicks; negative scrolls down
    #[arg(allow_negative_numbers = true)]
    pub clicks: i32,

    #[command(flatten)]
    pub driver: DriverArgs,
}

#[derive(Debug, clap::Args)]
pub struct MoveArgs {
    /// Absolute x coordinate
    #[arg(requires = "y", conflicts_with = "element")]
    pub x: Option<u32>,

    /// Absolute y coordinate
    pub y: Option<u32>,

    /// Move to this element's center instead
    #[arg(long, value_name = "PATH")]
    pub element: Option<String>,

    #[command(flatten)]
    pub driver: DriverArgs,
}

#[derive(Debug, clap::Args)]
pub struct ImageArgs {
    /// Reference image file
    pub image: PathBuf,

    /// Minimum correlation score, 0 to 1
    #[arg(long, default_value_t = axpilot_core::vision::DEFAULT_THRESHOLD)]
    pub threshold: f32,

    /// Keep searching for this many milliseconds; 0 tries once
    #[arg(long, value_name = "MS", default_value_t = 5_000)]
    pub wait_ms: u64,

    /// Delay between searches in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 200)]
    pub interval_ms: u64,

    #[command(flatten)]
    pub driver: DriverArgs,
}

#[derive(Debug, clap::Args)]
pub struct FindImageArgs {
    #[command(flatten)]
    pub image: ImageArgs,

    /// Search region as x,y,width,height [default: application, else screen]
    #[arg(long, value_parser = parse_region, conflicts_with = "percent")]
    pub region: Option<[u32; 4]>,

    /// Search region as fractions x0,y0,x1,y1 of the application rectangle
    #[arg(long, value_parser = parse_fractions)]
    pub percent: Option<[f64; 4]>,
}

#[derive(Debug, clap::Args)]
pub struct ClickImageArgs {
    #[command(flatten)]
    pub image: ImageArgs,

    /// Search region as fractions x0,y0,x1,y1 of the application rectangle
    #[arg(long, value_parser = parse_fractions)]
    pub percent: Option<[f64; 4]>,
}

fn parse_point(s: &str) -> Result<[u32; 2], String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected x,y, got '{}'", s))?;
    let coord = |v: &str| {
        v.trim()
            .parse::<u32>()
            .map_err(|_| format!("'{}' is not a coordinate", v.trim()))
    };
    Ok([coord(x)?, coord(y)?])
}

fn parse_four<T: std::str::FromStr>(s: &str) -> Result<[T; 4], String> {
    let parts: Vec<T> = s
        .split(',')
        .map(|p| p.trim().parse::<T>())
        .collect::<Result<_, _>>()
        .map_err(|_| format!("'{}' is not a list of numbers", s))?;
    parts
        .try_into()
        .map_err(|_| format!("expected 4 comma-separated values, got '{}'", s))
}

fn parse_region(s: &str) -> Result<[u32; 4], String> {
    parse_four(s)
}

fn parse_fractions(s: &str) -> Result<[f64; 4], String> {
    parse_four(s)
}
