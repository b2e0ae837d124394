//! services/screening/src/bin/hemoscan.rs

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use hemoscan_core::{
    domain::{AnalysisResult, Gender},
    ports::AnalysisService,
};
use screening_lib::{
    adapters::SqliteKvAdapter,
    capture::load_capture,
    config::Config,
    controller::{AppController, View},
    error::ClientError,
    gateway::AnalysisGateway,
    store::{Registration, SessionStore},
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Nail-bed hemoglobin screening client.
#[derive(Parser)]
#[command(name = "hemoscan", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account and sign in
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        age: u8,
        #[arg(long)]
        gender: Gender,
        /// Confirms the terms of use have been accepted
        #[arg(long)]
        accept_terms: bool,
    },
    /// Sign in to an existing account
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Analyze a nail-bed photograph
    Scan { image: PathBuf },
    /// List past scans, oldest first
    History,
    /// Show one past scan
    Show { scan_id: String },
    /// Update profile fields of the signed-in user
    Profile {
        #[arg(long)]
        age: Option<u8>,
        #[arg(long)]
        gender: Option<Gender>,
        #[arg(long)]
        share_data: Option<bool>,
    },
    /// Check whether the analysis backend is reachable
    Health,
    /// Re-fetch a scan from the structured backend
    Fetch { scan_id: String },
    /// Download the PDF report of a scan
    Report { scan_id: String, out: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    let cli = Cli::parse();

    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    info!("Configuration loaded. Backend: {:?}", config.backend);

    // --- 2. Open the Local Store & Run Migrations ---
    let kv = Arc::new(SqliteKvAdapter::connect(&config.database_url).await?);
    kv.run_migrations().await?;
    let store = Arc::new(SessionStore::new(kv));

    // --- 3. Initialize the Analysis Gateway & Controller ---
    let gateway = Arc::new(AnalysisGateway::from_config(&config)?);
    let analysis: Arc<dyn AnalysisService> = gateway.clone();
    let mut controller = AppController::new(store, analysis);
    controller.start().await?;

    // --- 4. Run the Command ---
    match cli.command {
        Command::Register {
            email,
            password,
            age,
            gender,
            accept_terms,
        } => {
            let user = controller
                .register(Registration {
                    email,
                    password,
                    age,
                    gender,
                    terms_accepted: accept_terms,
                })
                .await?;
            println!("Registered and signed in as {}", user.email);
        }
        Command::Login { email, password } => {
            let user = controller.login(&email, &password).await?;
            println!(
                "Signed in as {} ({} past scans)",
                user.email,
                controller.history().len()
            );
        }
        Command::Logout => {
            controller.logout().await?;
            println!("Signed out");
        }
        Command::Whoami => match controller.auth() {
            Some(auth) => println!(
                "{} (age {}, {:?}, data sharing {})",
                auth.user.email,
                auth.user.age,
                auth.user.gender,
                if auth.user.share_data { "on" } else { "off" }
            ),
            None => println!("Not signed in"),
        },
        Command::Scan { image } => {
            let blob = load_capture(&image).await?;
            let result = controller.run_scan(&blob).await?;
            print_result(&result);
        }
        Command::History => {
            let history = controller.chronological_history();
            if history.is_empty() {
                println!("No scans yet");
            }
            for result in history {
                println!(
                    "{}  {}  {:>5.1} g/dL  {:?}{}",
                    result.timestamp.format("%Y-%m-%d %H:%M"),
                    result.id,
                    result.hb_g_per_dl,
                    result.anemia_class,
                    if result.is_synthetic() { "  (synthetic)" } else { "" }
                );
            }
        }
        Command::Show { scan_id } => {
            let result = controller.select_result(&scan_id)?;
            print_result(result);
        }
        Command::Profile {
            age,
            gender,
            share_data,
        } => {
            if age.is_none() && gender.is_none() && share_data.is_none() {
                controller.navigate(View::Profile);
                match controller.auth() {
                    Some(auth) => println!("{:#?}", auth.user),
                    None => println!("Not signed in"),
                }
            } else {
                let user = controller.update_profile(age, gender, share_data).await?;
                println!("Profile updated for {}", user.email);
            }
        }
        Command::Health => {
            let healthy = gateway.health().await;
            println!(
                "{:?} backend: {}",
                gateway.kind(),
                if healthy { "available" } else { "unavailable" }
            );
        }
        Command::Fetch { scan_id } => {
            let adapter = gateway.structured().ok_or_else(|| {
                ClientError::Internal("Scan lookup needs the structured backend".to_string())
            })?;
            print_result(&adapter.fetch_scan(&scan_id).await?);
        }
        Command::Report { scan_id, out } => {
            let adapter = gateway.structured().ok_or_else(|| {
                ClientError::Internal("Reports need the structured backend".to_string())
            })?;
            let pdf = adapter.download_report(&scan_id).await?;
            tokio::fs::write(&out, &pdf).await?;
            println!("Wrote {} bytes to {}", pdf.len(), out.display());
        }
    }

    Ok(())
}

fn print_result(result: &AnalysisResult) {
    println!("Scan {}", result.id);
    println!("  taken        {}", result.timestamp.to_rfc3339());
    println!(
        "  hemoglobin   {:.1} g/dL (95% CI {:.1}-{:.1})",
        result.hb_g_per_dl, result.hb_ci_95.0, result.hb_ci_95.1
    );
    println!("  class        {:?}", result.anemia_class);
    println!("  confidence   {:.0}%", result.confidence * 100.0);
    println!("  skin tone    group {}", result.skin_tone_group);
    println!(
        "  quality      sharp={} bright={} glare={}",
        result.quality.sharpness_ok, result.quality.brightness_ok, result.quality.glare_detected
    );
    for explanation in &result.explanations {
        println!(
            "  - {} ({:?}): {}",
            explanation.feature, explanation.direction, explanation.impact
        );
    }
    if result.is_synthetic() {
        println!("  NOTE: synthetic estimate, the analysis backend was unavailable");
    }
}
