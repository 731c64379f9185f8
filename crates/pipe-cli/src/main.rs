mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Código de salida para errores de uso o de configuración.
pub const EXIT_CONFIG: i32 = 2;
/// Código de salida cuando falla una etapa del pipeline.
pub const EXIT_STAGE_FAILURE: i32 = 4;

#[derive(Parser)]
#[command(name = "pipeflow", version, about = "Ejecuta pipelines de procesos externos desde la línea de comandos")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Catálogo JSON de pipelines
    #[arg(long, short = 'c', global = true, env = "PIPEFLOW_CATALOG", default_value = "config/pipelines.json")]
    catalog: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Ejecuta un pipeline del catálogo
    Run {
        /// Nombre del pipeline
        #[arg(long, short = 'p', env = "PIPEFLOW_DEFAULT_PIPELINE", default_value = "generate")]
        pipeline: String,
        /// Número de iteraciones (sustituye la política del catálogo)
        #[arg(long)]
        iterations: Option<u32>,
        /// Pausa entre iteraciones en segundos
        #[arg(long)]
        delay_secs: Option<u64>,
        /// Directorio de trabajo para los namespaces de cada run
        #[arg(long, env = "PIPEFLOW_WORK_DIR")]
        work_dir: Option<PathBuf>,
        /// Copia el artifact final a este archivo
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// Lista los pipelines del catálogo
    List,
    /// Valida el catálogo sin ejecutar nada
    Validate,
}

fn init_logging() {
    let filter = std::env::var("PIPEFLOW_LOG").or_else(|_| std::env::var("RUST_LOG"))
                                              .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_target(false)
                             .with_writer(std::io::stderr)
                             .compact()
                             .with_env_filter(filter)
                             .init();
}

#[tokio::main]
async fn main() {
    // .env opcional con PIPEFLOW_*
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging();

    let code = match cli.command {
        Commands::Run { pipeline,
                        iterations,
                        delay_secs,
                        work_dir,
                        output, } => {
            let args = commands::RunArgs { catalog: cli.catalog,
                                           pipeline,
                                           iterations,
                                           delay_secs,
                                           work_dir,
                                           output };
            commands::run(args).await
        }
        Commands::List => commands::list(&cli.catalog),
        Commands::Validate => commands::validate(&cli.catalog),
    };
    std::process::exit(code);
}
