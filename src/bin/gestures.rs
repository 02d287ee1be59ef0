//! Gestures CLI - Command-line interface for the skeletal gesture engine
//!
//! Commands:
//! - replay: Stream recorded NDJSON frames through the engine
//! - validate: Check gesture and reference files for mistakes
//! - inspect: Print the relationships a gesture set evaluates each frame
//! - schema: Print file and frame schemas

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use skeletal_gestures::persistence::{self, parse_frame_line};
use skeletal_gestures::{
    EngineConfig, EngineEvent, EventLog, GestureDefinition, GestureEngine, GestureError, JointId,
    ProgressScope, RecordedEvent, Relation, UsedRelationships, ENGINE_VERSION,
};

/// Gestures - Sequential gesture recognition over 3D skeleton streams
#[derive(Parser)]
#[command(name = "gestures")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Recognize multi-step gestures in skeleton recordings", long_about = None)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream recorded frames through the engine and emit events
    Replay {
        /// Gesture definitions (JSON array)
        #[arg(short, long)]
        gestures: PathBuf,

        /// Static reference points (JSON array)
        #[arg(short, long)]
        references: Option<PathBuf>,

        /// Engine configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Input NDJSON frames (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Output NDJSON events (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Track progress separately for every player
        #[arg(long)]
        per_player: bool,

        /// Pace frames by their timestamps so timeouts can fire
        #[arg(long)]
        realtime: bool,

        /// Frame rate used by --realtime when frames carry no timestamp
        #[arg(long, default_value = "30")]
        fps: u32,

        /// Which events to write
        #[arg(long, default_value = "all")]
        events: EventFilter,

        /// Print a JSON summary to stderr when done
        #[arg(long)]
        summary: bool,
    },

    /// Check gesture and reference files for mistakes
    Validate {
        /// Gesture definitions (JSON array)
        #[arg(short, long)]
        gestures: PathBuf,

        /// Static reference points (JSON array)
        #[arg(short, long)]
        references: Option<PathBuf>,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the relationships evaluated every frame
    Inspect {
        /// Gesture definitions (JSON array)
        #[arg(short, long)]
        gestures: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EventFilter {
    /// Every engine event, including per-frame markers
    All,
    /// Processing events without frame markers
    Processing,
    /// Only gesture recognitions
    Recognized,
}

impl EventFilter {
    fn keeps(self, event: &EngineEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Processing => *event != EngineEvent::FrameProcessed,
            EventFilter::Recognized => event.is_recognition(),
        }
    }
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Gesture definition file
    Gestures,
    /// Static reference file
    References,
    /// One NDJSON frame line
    Frame,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), GesturesCliError> {
    match cli.command {
        Commands::Replay {
            gestures,
            references,
            config,
            input,
            output,
            per_player,
            realtime,
            fps,
            events,
            summary,
        } => {
            let mut engine_config = match config {
                Some(path) => EngineConfig::from_json(&fs::read_to_string(path)?)?,
                None => EngineConfig::default(),
            };
            if per_player {
                engine_config.progress_scope = ProgressScope::PerPlayer;
            }
            let pacing = realtime.then(|| Duration::from_secs_f64(1.0 / f64::from(fps.max(1))));

            cmd_replay(
                &gestures,
                references.as_deref(),
                engine_config,
                &input,
                &output,
                pacing,
                events,
                summary,
            )
        }

        Commands::Validate {
            gestures,
            references,
            json,
        } => cmd_validate(&gestures, references.as_deref(), json),

        Commands::Inspect { gestures, json } => cmd_inspect(&gestures, json),

        Commands::Schema {
            schema_type,
            json_schema,
        } => cmd_schema(schema_type, json_schema),
    }
}

fn open_input(input: &Path) -> Result<Box<dyn BufRead>, GesturesCliError> {
    if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            warn!("reading frames from an interactive terminal; pipe a recording or pass --input");
        }
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        Ok(Box::new(BufReader::new(File::open(input)?)))
    }
}

fn open_output(output: &Path) -> Result<Box<dyn Write>, GesturesCliError> {
    if output.to_string_lossy() == "-" {
        Ok(Box::new(io::stdout()))
    } else {
        Ok(Box::new(BufWriter::new(File::create(output)?)))
    }
}

/// Delay before processing a frame when replaying in real time
fn frame_delay(
    previous: Option<DateTime<Utc>>,
    current: Option<DateTime<Utc>>,
    fallback: Duration,
) -> Duration {
    match (previous, current) {
        (Some(previous), Some(current)) => (current - previous).to_std().unwrap_or(Duration::ZERO),
        _ => fallback,
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_replay(
    gestures: &Path,
    references: Option<&Path>,
    config: EngineConfig,
    input: &Path,
    output: &Path,
    pacing: Option<Duration>,
    filter: EventFilter,
    summary: bool,
) -> Result<(), GesturesCliError> {
    let log = EventLog::new();
    let mut engine = GestureEngine::new(config, log.clone());
    engine.load_gestures_json(&fs::read_to_string(gestures)?)?;
    if let Some(path) = references {
        engine.load_references_json(&fs::read_to_string(path)?)?;
    }
    let session = engine.start()?;

    let reader = open_input(input)?;
    let mut writer = open_output(output)?;
    let mut report = ReplayReport {
        session: session.to_string(),
        frames: 0,
        events: 0,
        recognitions: BTreeMap::new(),
    };
    let mut previous_timestamp = None;

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        let Some(frame) = parse_frame_line(line_num + 1, &line)? else {
            continue;
        };

        if let Some(fallback) = pacing {
            if report.frames > 0 {
                thread::sleep(frame_delay(previous_timestamp, frame.timestamp, fallback));
            }
            previous_timestamp = frame.timestamp;
        }

        let frame_report = engine.process_frame(&frame)?;
        report.frames += 1;
        for presence in &frame_report.presence {
            info!(player = presence.player(), ?presence, "presence changed");
        }

        write_events(&mut writer, &log, report.frames, filter, &mut report)?;
    }

    engine.stop();
    // Timeouts the timer thread fired before stop; stop itself disarms the rest silently
    write_events(&mut writer, &log, report.frames, filter, &mut report)?;
    writer.flush()?;

    info!(
        session = %report.session,
        frames = report.frames,
        events = report.events,
        "replay finished"
    );
    if summary {
        eprintln!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}

fn write_events(
    writer: &mut dyn Write,
    log: &EventLog,
    frame: u64,
    filter: EventFilter,
    report: &mut ReplayReport,
) -> Result<(), GesturesCliError> {
    for recorded in log.drain() {
        if let EngineEvent::GestureRecognized { gesture, .. } = &recorded.event {
            *report.recognitions.entry(gesture.clone()).or_default() += 1;
        }
        if !filter.keeps(&recorded.event) {
            continue;
        }
        let record = EventRecord {
            frame,
            text: recorded.event.processing_text(),
            recorded,
        };
        writeln!(writer, "{}", serde_json::to_string(&record)?)?;
        report.events += 1;
    }
    writer.flush()?;
    Ok(())
}

fn load_gesture_file(path: &Path) -> Result<Vec<GestureDefinition>, GesturesCliError> {
    Ok(persistence::load_gestures(path)?)
}

fn cmd_validate(
    gestures: &Path,
    references: Option<&Path>,
    json: bool,
) -> Result<(), GesturesCliError> {
    let definitions = load_gesture_file(gestures)?;
    let points = match references {
        Some(path) => persistence::load_references(path)?,
        None => Vec::new(),
    };

    let mut issues = Vec::new();
    let mut issue = |severity, gesture: &str, step: Option<usize>, message: String| {
        issues.push(ValidationIssue {
            severity,
            gesture: gesture.to_string(),
            step,
            message,
        });
    };

    let mut seen_gestures = HashSet::new();
    let mut seen_points = HashSet::new();
    for point in &points {
        if !seen_points.insert(point.id.as_str()) {
            issue(
                Severity::Error,
                "",
                None,
                format!("static reference {} is defined twice", point.id),
            );
        }
    }

    let mut conditions = 0;
    for gesture in &definitions {
        if !seen_gestures.insert(gesture.name.as_str()) {
            issue(Severity::Error, &gesture.name, None, "gesture is defined twice".to_string());
        }
        if gesture.steps.is_empty() {
            issue(Severity::Error, &gesture.name, None, "gesture has no steps".to_string());
        }
        if gesture.timeout_ms == 0 {
            issue(
                Severity::Warning,
                &gesture.name,
                None,
                "timeout is zero; progress resets immediately".to_string(),
            );
        }

        for (index, step) in gesture.steps.iter().enumerate() {
            if step.success_conditions.is_empty() {
                issue(
                    Severity::Warning,
                    &gesture.name,
                    Some(index),
                    "step has no success conditions and completes on any frame".to_string(),
                );
            }
            for condition in step.conditions() {
                conditions += 1;
                let relative = condition.relative_id.as_str();
                let is_joint = relative.parse::<JointId>().is_ok();

                if condition.relation.is_delta() {
                    if relative != condition.actor_joint.as_str() {
                        issue(
                            Severity::Warning,
                            &gesture.name,
                            Some(index),
                            format!(
                                "{} ignores relative {}; it measures {} against its own snapshot",
                                condition.relation, relative, condition.actor_joint
                            ),
                        );
                    }
                } else if !is_joint && !seen_points.contains(relative) {
                    issue(
                        Severity::Warning,
                        &gesture.name,
                        Some(index),
                        format!("relative {} is neither a joint nor a static reference", relative),
                    );
                }

                if condition.relation.is_boolean() && condition.deviation != 0 {
                    issue(
                        Severity::Warning,
                        &gesture.name,
                        Some(index),
                        format!("deviation {} is ignored by {}", condition.deviation, condition.relation),
                    );
                }
                if condition.relation == Relation::Distance && condition.actor_joint.as_str() == relative {
                    issue(
                        Severity::Warning,
                        &gesture.name,
                        Some(index),
                        "distance from a joint to itself is always 0".to_string(),
                    );
                }
            }
        }
    }

    let report = ValidationReport {
        gestures: definitions.len(),
        steps: definitions.iter().map(|g| g.steps.len()).sum(),
        conditions,
        references: points.len(),
        errors: issues.iter().filter(|i| i.severity == Severity::Error).count(),
        warnings: issues.iter().filter(|i| i.severity == Severity::Warning).count(),
        issues,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Gestures:   {}", report.gestures);
        println!("Steps:      {}", report.steps);
        println!("Conditions: {}", report.conditions);
        println!("References: {}", report.references);

        if !report.issues.is_empty() {
            println!("\nIssues:");
            for issue in &report.issues {
                let tag = match issue.severity {
                    Severity::Error => "[ERR]",
                    Severity::Warning => "[WARN]",
                };
                let location = match (issue.gesture.is_empty(), issue.step) {
                    (true, _) => "references".to_string(),
                    (false, Some(step)) => format!("{} step {}", issue.gesture, step),
                    (false, None) => issue.gesture.clone(),
                };
                println!("  {} {}: {}", tag, location, issue.message);
            }
        }
    }

    if report.errors > 0 {
        Err(GesturesCliError::ValidationFailed(report.errors))
    } else {
        Ok(())
    }
}

fn cmd_inspect(gestures: &Path, json: bool) -> Result<(), GesturesCliError> {
    let definitions = load_gesture_file(gestures)?;
    let index = UsedRelationships::build(&definitions);

    if json {
        let relationships: Vec<InspectEntry> = index
            .keys()
            .map(|key| InspectEntry {
                actor: key.actor,
                relative: key.relative,
                relation: key.relation,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&relationships)?);
        return Ok(());
    }

    print_index(&definitions, &index);
    Ok(())
}

fn print_index(definitions: &[GestureDefinition], index: &UsedRelationships) {
    println!("Used Relationships");
    println!("==================");
    println!("Gestures:      {}", definitions.len());
    println!("Relationships: {}", index.len());
    for actor in index.actors() {
        println!("\n{}", actor);
        for (relative, relation) in index.relations_for(actor) {
            println!("  {:<10} {}", relation.as_str(), relative);
        }
    }
    let named = index.named_relatives();
    if !named.is_empty() {
        println!("\nStatic references needed:");
        for relative in named {
            println!("  {}", relative);
        }
    }
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), GesturesCliError> {
    match schema_type {
        SchemaType::Gestures => {
            if json_schema {
                println!("{}", gestures_json_schema());
            } else {
                println!("Gesture file: JSON array of gestures");
                println!();
                println!("- name: Unique gesture name");
                println!("- timeoutMs: Time allowed after the first step (default 5000)");
                println!("- steps: Ordered steps, each with:");
                println!("  - successConditions: All must hold to complete the step");
                println!("  - failureConditions: Any resets the gesture");
                println!();
                println!("Condition: {{ actorJoint, relation, relativeId, deviation }}");
                println!(
                    "Joints: {}",
                    JointId::ALL.iter().map(|j| j.as_str()).collect::<Vec<_>>().join(", ")
                );
                println!(
                    "Relations: {}",
                    Relation::ALL.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(", ")
                );
            }
        }
        SchemaType::References => {
            if json_schema {
                println!("{}", references_json_schema());
            } else {
                println!("Reference file: JSON array of {{ id, x, y, z }}");
                println!();
                println!("Coordinates use the same units as normalized joints (millimetres).");
                println!("Ids must not collide with joint names.");
            }
        }
        SchemaType::Frame => {
            if json_schema {
                println!("{}", frame_json_schema());
            } else {
                println!("Frame: one JSON object per line");
                println!();
                println!("- timestamp: Optional RFC 3339 capture time");
                println!("- skeletons: Array of skeletons, each with:");
                println!("  - trackingId: Sensor player id (0 is ignored)");
                println!("  - trackingState: tracked | inferred | position_only | not_tracked");
                println!("  - position: Optional {{ x, y, z }} in meters");
                println!("  - joints: {{ JointName: {{ x, y, z, trackingState? }} }} in meters");
            }
        }
    }

    Ok(())
}

fn condition_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["actorJoint", "relation", "relativeId"],
        "properties": {
            "actorJoint": {
                "type": "string",
                "enum": JointId::ALL.iter().map(|j| j.as_str()).collect::<Vec<_>>()
            },
            "relation": {
                "type": "string",
                "enum": Relation::ALL.iter().map(|r| r.as_str()).collect::<Vec<_>>()
            },
            "relativeId": { "type": "string" },
            "deviation": { "type": "integer", "default": 0 }
        }
    })
}

fn gestures_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "gestures",
        "type": "array",
        "items": {
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": { "type": "string" },
                "timeoutMs": { "type": "integer", "minimum": 0, "default": 5000 },
                "steps": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "properties": {
                            "successConditions": { "type": "array", "items": condition_schema() },
                            "failureConditions": { "type": "array", "items": condition_schema() }
                        }
                    }
                }
            }
        }
    })
    .to_string()
}

fn references_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "references",
        "type": "array",
        "items": {
            "type": "object",
            "required": ["id", "x", "y", "z"],
            "properties": {
                "id": { "type": "string" },
                "x": { "type": "number" },
                "y": { "type": "number" },
                "z": { "type": "number" }
            }
        }
    })
    .to_string()
}

fn frame_json_schema() -> String {
    let point = serde_json::json!({
        "type": "object",
        "required": ["x", "y", "z"],
        "properties": {
            "x": { "type": "number" },
            "y": { "type": "number" },
            "z": { "type": "number" },
            "trackingState": {
                "type": "string",
                "enum": ["tracked", "inferred", "position_only", "not_tracked"]
            }
        }
    });
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "frame",
        "type": "object",
        "properties": {
            "timestamp": { "type": "string", "format": "date-time" },
            "skeletons": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["trackingId"],
                    "properties": {
                        "trackingId": { "type": "integer", "minimum": 0 },
                        "trackingState": {
                            "type": "string",
                            "enum": ["tracked", "inferred", "position_only", "not_tracked"]
                        },
                        "position": point,
                        "joints": {
                            "type": "object",
                            "propertyNames": {
                                "enum": JointId::ALL.iter().map(|j| j.as_str()).collect::<Vec<_>>()
                            },
                            "additionalProperties": point
                        }
                    }
                }
            }
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum GesturesCliError {
    Io(io::Error),
    Engine(GestureError),
    Json(serde_json::Error),
    ValidationFailed(usize),
}

impl From<io::Error> for GesturesCliError {
    fn from(e: io::Error) -> Self {
        GesturesCliError::Io(e)
    }
}

impl From<GestureError> for GesturesCliError {
    fn from(e: GestureError) -> Self {
        GesturesCliError::Engine(e)
    }
}

impl From<serde_json::Error> for GesturesCliError {
    fn from(e: serde_json::Error) -> Self {
        GesturesCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<GesturesCliError> for CliError {
    fn from(e: GesturesCliError) -> Self {
        match e {
            GesturesCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            GesturesCliError::Engine(e) => {
                let hint = match &e {
                    GestureError::JsonError(_) | GestureError::ParseError(_) => {
                        "Run 'gestures schema' to see the expected format"
                    }
                    GestureError::EmptyGesture(_) | GestureError::DuplicateGesture(_) => {
                        "Run 'gestures validate' for details"
                    }
                    _ => "Check the gesture and reference files",
                };
                CliError {
                    code: "ENGINE_ERROR".to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            GesturesCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            GesturesCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} validation errors", count),
                hint: Some("Fix the reported errors and retry".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct EventRecord {
    frame: u64,
    #[serde(flatten)]
    recorded: RecordedEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(serde::Serialize)]
struct ReplayReport {
    session: String,
    frames: u64,
    events: u64,
    recognitions: BTreeMap<String, u64>,
}

#[derive(Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
enum Severity {
    Error,
    Warning,
}

#[derive(serde::Serialize)]
struct ValidationIssue {
    severity: Severity,
    #[serde(skip_serializing_if = "String::is_empty")]
    gesture: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<usize>,
    message: String,
}

#[derive(serde::Serialize)]
struct ValidationReport {
    gestures: usize,
    steps: usize,
    conditions: usize,
    references: usize,
    errors: usize,
    warnings: usize,
    issues: Vec<ValidationIssue>,
}

#[derive(serde::Serialize)]
struct InspectEntry {
    actor: JointId,
    relative: String,
    relation: Relation,
}
