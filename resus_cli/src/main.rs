use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use resus_core::audit::write_csv;
use resus_core::engine::PendingIntervention;
use resus_core::survey::{get_default_protocol, SafetyAlert, SurveyProtocol, SurveySession};
use resus_core::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "resus")]
#[command(about = "Pediatric resuscitation decision support", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered pathways
    Pathways,

    /// Start a new case, discarding any active one
    Start {
        /// Clinical engine (defaults to the configured engine)
        #[arg(long, value_enum)]
        engine: Option<EngineArg>,

        /// Patient weight in kg
        #[arg(long)]
        weight: Option<f64>,

        /// Patient age, e.g. "3 years", "6m", "2 weeks"
        #[arg(long)]
        age: Option<String>,

        /// Trauma patient (adds catastrophic hemorrhage to the survey)
        #[arg(long)]
        trauma: bool,
    },

    /// Dispatch one input to the active case
    Input {
        /// Question id or command (step_done, improving, select_pathway, begin, ...)
        kind: String,

        /// Answer or argument
        value: Option<String>,
    },

    /// Show what to do next
    Status {
        /// Print the prompt as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the audit record of the active case
    Export {
        /// Also write the event log as CSV to this path
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Calculate a single weight-based dose
    Dose {
        #[arg(long)]
        per_kg: f64,

        #[arg(long)]
        unit: String,

        #[arg(long)]
        route: String,

        /// Maximum absolute dose
        #[arg(long)]
        max: Option<f64>,

        /// Patient weight in kg; without it the per-kg rate is shown
        #[arg(long)]
        weight: Option<f64>,

        #[arg(long, default_value = "Dose")]
        drug: String,
    },

    /// Estimate weight from age
    Weight {
        /// Age, e.g. "3 years"
        age: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EngineArg {
    Pathway,
    Survey,
}

impl From<EngineArg> for EngineKind {
    fn from(arg: EngineArg) -> Self {
        match arg {
            EngineArg::Pathway => EngineKind::Pathway,
            EngineArg::Survey => EngineKind::Survey,
        }
    }
}

/// The case persisted between invocations
#[derive(Serialize, Deserialize)]
#[serde(tag = "engine", content = "session", rename_all = "snake_case")]
enum ActiveSession {
    Pathway(Session),
    Survey(SurveySession),
}

/// Where the CLI keeps its files
struct DataPaths {
    active: PathBuf,
    events: PathBuf,
    exports: PathBuf,
}

impl DataPaths {
    fn new(data_dir: &Path) -> Self {
        Self {
            active: data_dir.join("active_session.json"),
            events: data_dir.join("events.jsonl"),
            exports: data_dir.join("exports"),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    resus_core::logging::init_for_verbosity(cli.verbose);

    let config = Config::load()?;
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    let paths = DataPaths::new(&data_dir);

    match cli.command {
        Commands::Pathways => cmd_pathways(),
        Commands::Start {
            engine,
            weight,
            age,
            trauma,
        } => {
            let kind = engine.map(EngineKind::from).unwrap_or(config.engine.default);
            let patient = PatientContext::new(weight, age.as_deref(), trauma);
            cmd_start(&paths, kind, patient)
        }
        Commands::Input { kind, value } => {
            cmd_input(&paths, &Input::new(&kind, value.as_deref().unwrap_or("")))
        }
        Commands::Status { json } => cmd_status(&paths, json),
        Commands::Export { csv } => cmd_export(&paths, &config, csv),
        Commands::Dose {
            per_kg,
            unit,
            route,
            max,
            weight,
            drug,
        } => {
            let mut spec = DoseSpec::new(&drug, per_kg, &unit, &route);
            if let Some(max) = max {
                spec = spec.max(max);
            }
            cmd_dose(&spec, weight);
            Ok(())
        }
        Commands::Weight { age } => {
            cmd_weight(&age);
            Ok(())
        }
    }
}

/// Default registry, rejected if it fails its load-time checks
fn checked_registry() -> Result<&'static PathwayRegistry> {
    let registry = get_default_registry();
    let errors = registry.validate();
    if !errors.is_empty() {
        eprintln!("Pathway registry validation errors:");
        for error in &errors {
            eprintln!("  - {}", error);
        }
        return Err(Error::Registry("Invalid pathway registry".into()));
    }
    Ok(registry)
}

/// Default survey protocol, rejected if it fails its load-time checks
fn checked_protocol() -> Result<&'static SurveyProtocol> {
    let protocol = get_default_protocol();
    let errors = protocol.validate();
    if !errors.is_empty() {
        eprintln!("Survey protocol validation errors:");
        for error in &errors {
            eprintln!("  - {}", error);
        }
        return Err(Error::Registry("Invalid survey protocol".into()));
    }
    Ok(protocol)
}

fn load_active(paths: &DataPaths) -> Result<ActiveSession> {
    store::load_snapshot(&paths.active)
        .ok_or_else(|| Error::Session("No active case. Run `resus start` first.".into()))
}

fn cmd_pathways() -> Result<()> {
    let registry = checked_registry()?;
    for pathway in registry.pathways() {
        println!("  {:<16} {}", pathway.id, pathway.name);
        for sub in &pathway.sub_pathways {
            println!("    - {:<14} {}", sub.id, sub.name);
        }
    }
    Ok(())
}

fn cmd_start(paths: &DataPaths, kind: EngineKind, patient: PatientContext) -> Result<()> {
    let registry = checked_registry()?;
    if patient.weight_estimated {
        if let Some(weight) = patient.weight_kg {
            println!("Estimated weight from age: {} kg", weight);
        }
    }

    match kind {
        EngineKind::Pathway => {
            let engine = PathwayEngine::new(registry);
            let session = engine.start(patient, Utc::now());
            begin_case(paths, &engine, &session, ActiveSession::Pathway(session.clone()))
        }
        EngineKind::Survey => {
            let engine = SurveyEngine::new(checked_protocol()?);
            let session = engine.start(patient, Utc::now());
            begin_case(paths, &engine, &session, ActiveSession::Survey(session.clone()))
        }
    }
}

fn begin_case<E: ClinicalEngine>(
    paths: &DataPaths,
    engine: &E,
    session: &E::Session,
    active: ActiveSession,
) -> Result<()> {
    store::save_snapshot(&paths.active, &active)?;
    let mut sink = JsonlEventSink::new(&paths.events);
    sink.append(engine.session_id(session), engine.log(session))?;

    println!("Started {} case {}", engine.name(), engine.session_id(session));
    show(engine, session);
    Ok(())
}

fn cmd_input(paths: &DataPaths, input: &Input) -> Result<()> {
    let registry = checked_registry()?;
    let mut sink = JsonlEventSink::new(&paths.events);

    let active = match load_active(paths)? {
        ActiveSession::Pathway(session) => {
            let engine = PathwayEngine::new(registry);
            let next = apply(&engine, &session, input, &mut sink)?;
            show(&engine, &next);
            ActiveSession::Pathway(next)
        }
        ActiveSession::Survey(session) => {
            let engine = SurveyEngine::new(checked_protocol()?);
            let next = apply(&engine, &session, input, &mut sink)?;
            show(&engine, &next);
            ActiveSession::Survey(next)
        }
    };

    store::save_snapshot(&paths.active, &active)
}

/// Dispatch one input and append whatever it logged to the event sink
fn apply<E: ClinicalEngine>(
    engine: &E,
    session: &E::Session,
    input: &Input,
    sink: &mut impl EventSink,
) -> Result<E::Session> {
    let before = engine.log(session).len();
    let next = engine.dispatch(session, input, Utc::now());
    let added = &engine.log(&next)[before..];

    if added.is_empty() {
        println!("Input '{}' not accepted now; nothing changed.", input.kind);
    } else {
        sink.append(engine.session_id(&next), added)?;
        for entry in added {
            tracing::debug!("{} {}", entry.kind.label(), entry.detail);
        }
    }
    Ok(next)
}

fn cmd_status(paths: &DataPaths, json: bool) -> Result<()> {
    let registry = checked_registry()?;
    match load_active(paths)? {
        ActiveSession::Pathway(session) => {
            let engine = PathwayEngine::new(registry);
            status(&engine, &session, json)
        }
        ActiveSession::Survey(session) => {
            let engine = SurveyEngine::new(checked_protocol()?);
            status(&engine, &session, json)
        }
    }
}

fn status<E: ClinicalEngine>(engine: &E, session: &E::Session, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&engine.prompt(session))?);
    } else {
        show(engine, session);
    }
    Ok(())
}

fn cmd_export(paths: &DataPaths, config: &Config, csv: Option<PathBuf>) -> Result<()> {
    let registry = checked_registry()?;
    let include_patient = config.export.include_patient;
    let csv_path = |id: uuid::Uuid| {
        csv.clone().or_else(|| {
            config
                .export
                .csv
                .then(|| paths.exports.join(format!("{}.csv", id)))
        })
    };

    match load_active(paths)? {
        ActiveSession::Pathway(session) => {
            let engine = PathwayEngine::new(registry);
            export(&engine, &session, include_patient, csv_path(session.id))
        }
        ActiveSession::Survey(session) => {
            let engine = SurveyEngine::new(checked_protocol()?);
            export(&engine, &session, include_patient, csv_path(session.id))
        }
    }
}

fn export<E: ClinicalEngine>(
    engine: &E,
    session: &E::Session,
    include_patient: bool,
    csv: Option<PathBuf>,
) -> Result<()> {
    print!("{}", engine.export(session, include_patient));

    if let Some(path) = csv {
        let started_at = engine.header(session, false).started_at;
        let rows = write_csv(&path, started_at, engine.log(session))?;
        println!("Wrote {} events to {}", rows, path.display());
    }
    Ok(())
}

fn cmd_dose(spec: &DoseSpec, weight: Option<f64>) {
    let dose = calculate_dose(spec, weight);
    println!("{}", dose.calculated_dose);
    if !dose.preparation.is_empty() {
        println!("  {}", dose.preparation);
    }
}

fn cmd_weight(age: &str) {
    match estimate_weight_from_age(age) {
        Some(weight) => println!("Estimated weight: {} kg", weight),
        None => println!("No weight estimate for '{}'", age),
    }
}

// ============================================================================
// Rendering
// ============================================================================

fn show<E: ClinicalEngine>(engine: &E, session: &E::Session) {
    for alert in engine.active_alerts(session) {
        print_alert(&alert);
    }
    print_prompt(&engine.prompt(session));
}

fn print_alert(alert: &SafetyAlert) {
    println!("!! SAFETY ({:?}): {}", alert.severity, alert.message);
    println!("   acknowledge: resus input acknowledge_alert {}", alert.id);
}

fn print_prompt(prompt: &Prompt) {
    println!();
    match prompt {
        Prompt::Begin => {
            println!("Primary survey ready.");
            println!("  -> resus input begin");
        }
        Prompt::Question { question } => print_question(question),
        Prompt::Questions { letter, questions } => {
            println!("{} - {}", letter, letter.title());
            for question in questions {
                print_question(question);
            }
        }
        Prompt::SelectPathway { options } => {
            println!("Select a pathway:");
            for option in options {
                println!("  {:<16} {}", option.id, option.name);
            }
            println!("  -> resus input select_pathway <id>");
        }
        Prompt::Step {
            index,
            total,
            step,
            dose,
        } => {
            let flag = if step.critical { " [CRITICAL]" } else { "" };
            println!("Step {}/{}: {}{}", index + 1, total, step.action, flag);
            if let Some(detail) = &step.detail {
                println!("  {}", detail);
            }
            if let Some(dose) = dose {
                println!("  Dose: {}", dose.calculated_dose);
                if !dose.preparation.is_empty() {
                    println!("        {}", dose.preparation);
                }
            }
            if let Some(seconds) = step.timer_seconds {
                println!("  Timer: {} s", seconds);
            }
            println!("  -> resus input step_done");
        }
        Prompt::Reassess {
            question,
            escalation,
        } => {
            println!("REASSESS: {}", question);
            if let Some(escalation) = escalation {
                println!("  If not improving: {}", escalation);
            }
            println!("  -> resus input improving yes|no");
        }
        Prompt::Interventions { items } => {
            println!("Interventions:");
            print_interventions(items);
        }
        Prompt::CardiacArrest { items } => {
            println!("CARDIAC ARREST");
            print_interventions(items);
            println!("  -> resus input rosc (on return of spontaneous circulation)");
        }
        Prompt::Complete { summary } => {
            println!("Complete.");
            println!(
                "  Threats: {}  Interventions: {}  Safety alerts: {}",
                summary.threats, summary.interventions, summary.safety_alerts
            );
            println!("  -> resus export");
        }
    }
}

fn print_question(question: &Question) {
    println!("{}", question.prompt);
    for option in &question.options {
        println!("  {:<14} {}", option.value, option.label);
    }
    println!("  -> resus input {} <value>", question.id);
}

fn print_interventions(items: &[PendingIntervention]) {
    for item in items {
        let dose = item
            .dose
            .as_ref()
            .map(|d| format!(" ({})", d.calculated_dose))
            .unwrap_or_default();
        println!(
            "  [{}] {}:{}  {}{}",
            item.severity, item.threat_id, item.step.id, item.step.action, dose
        );
    }
    println!("  -> resus input intervention_done <threat:intervention>");
}
