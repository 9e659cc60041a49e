//! myconverge - MySQL instance convergence
//!
//! Converges a MySQL instance, and optionally master/slave replication,
//! to the state declared in a TOML configuration file.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use myconverge::config::{ConvergeConfig, InstanceConfig, ReplicationOverrides, RoleKind};
use myconverge::converge::Converger;
use myconverge::error::{Error, Result};
use myconverge::host::{Host, MemoryHost, SystemHost};
use myconverge::provision::CONTAINER_MARKERS;
use myconverge::replication::{self, ReplicationRole};
use myconverge::sql::{open_session, MemorySession};
use myconverge::tuning;

/// myconverge - MySQL instance convergence
#[derive(Parser)]
#[command(name = "myconverge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "myconverge.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [logging]
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a convergence pass against this machine
    Converge {
        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Show what a pass would change on a fresh machine, without changing anything
    Plan {
        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "myconverge.toml")]
        output: PathBuf,

        /// Replication role of the sample configuration
        #[arg(long, value_enum)]
        role: Option<RoleArg>,
    },

    /// Validate configuration file
    Validate {
        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Show resolved configuration and detected tuning
    Info {
        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Print the replication statements a pass would send
    ShowSql {
        #[command(flatten)]
        overrides: OverrideArgs,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Master,
    Slave,
}

impl From<RoleArg> for RoleKind {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Master => RoleKind::Master,
            RoleArg::Slave => RoleKind::Slave,
        }
    }
}

/// Command-line overrides applied on top of the configuration file
#[derive(Args, Default)]
struct OverrideArgs {
    /// MySQL port
    #[arg(long)]
    port: Option<u16>,

    /// Replication role
    #[arg(long, value_enum)]
    role: Option<RoleArg>,

    /// Replication server id
    #[arg(long)]
    server_id: Option<u32>,

    /// Master host (slave only)
    #[arg(long)]
    master_host: Option<String>,

    /// Master port (slave only)
    #[arg(long)]
    master_port: Option<u16>,
}

impl OverrideArgs {
    fn instance(&self) -> InstanceConfig {
        InstanceConfig {
            port: self.port,
            ..Default::default()
        }
    }

    fn replication(&self) -> ReplicationOverrides {
        ReplicationOverrides {
            role: self.role.map(RoleKind::from),
            server_id: self.server_id,
            password: None,
            master_host: self.master_host.clone(),
            master_port: self.master_port,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings come from the config file when it can be read
    let logging = ConvergeConfig::from_file(&cli.config)
        .map(|c| c.logging)
        .unwrap_or_default();
    let level = cli.log_level.clone().unwrap_or(logging.level);
    init_logging(&level, &logging.format);

    let result = match cli.command {
        Commands::Converge { overrides } => run_converge(&cli.config, &overrides).await,
        Commands::Plan { overrides } => run_plan(&cli.config, &overrides).await,
        Commands::Init { output, role } => run_init(output, role),
        Commands::Validate { overrides } => run_validate(&cli.config, &overrides),
        Commands::Info { overrides } => run_info(&cli.config, &overrides),
        Commands::ShowSql { overrides } => run_show_sql(&cli.config, &overrides),
    };

    if let Err(e) = &result {
        if e.is_input_error() {
            tracing::error!("Nothing was changed; fix {:?} and run again", cli.config);
        }
    }

    result
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Load the configuration file and apply command-line overrides
fn load_config(path: &Path, overrides: &OverrideArgs) -> Result<ConvergeConfig> {
    let config = match ConvergeConfig::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", path, e);
            tracing::error!("Please check that the config file exists and is valid TOML");
            return Err(e);
        }
    };

    config.with_overrides(&overrides.instance(), &overrides.replication())
}

/// Run a convergence pass against the local machine
async fn run_converge(config_path: &Path, overrides: &OverrideArgs) -> Result<()> {
    let config = load_config(config_path, overrides)?;

    // Input errors surface before anything is touched
    let options = config.instance_options()?;

    if !nix::unistd::Uid::effective().is_root() {
        tracing::error!("Converging requires root to manage services and files under /etc");
        return Err(Error::Host("not running as root".into()));
    }

    let host = SystemHost::detect();
    let session = open_session(&config.database, &options).await?;

    let report = match Converger::new(&host, session.as_ref(), &config).run().await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Convergence pass failed: {}", e);
            if e.is_retryable() {
                tracing::error!("The failure may be transient; run the pass again to retry");
            }
            return Err(e);
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Dry run against an in-memory machine with the local platform
async fn run_plan(config_path: &Path, overrides: &OverrideArgs) -> Result<()> {
    let config = load_config(config_path, overrides)?;

    let local = SystemHost::detect();
    let mut host = MemoryHost::new(local.platform());
    for marker in CONTAINER_MARKERS {
        if local.file_exists(Path::new(marker)).await {
            host = host.with_file(marker, "");
        }
    }
    let session = MemorySession::new();

    let report = Converger::new(&host, &session, &config).run().await?;

    println!("Plan for instance {} ({})", report.instance, local.platform());
    println!();
    println!("Host changes:");
    for action in host.actions().await {
        println!("  {}", action);
    }
    println!();
    println!("SQL statements:");
    let statements = session.statements().await;
    if statements.is_empty() {
        println!("  (none)");
    }
    for statement in statements {
        println!("  {};", statement);
    }
    println!();
    println!("Steps:");
    for step in &report.steps {
        println!("  {:<20} {}", step.step, serde_json::to_string(&step.outcome)?);
    }

    Ok(())
}

/// Initialize configuration file
fn run_init(output: PathBuf, role: Option<RoleArg>) -> Result<()> {
    let replication = match role {
        None => "# [replication]\n\
                 # role = \"slave\"\n\
                 # server_id = 2\n\
                 # password = \"repl\"\n\
                 # master_host = \"db1.example.com\"\n\
                 # master_port = 3306\n"
            .to_string(),
        Some(RoleArg::Master) => "[replication]\n\
                                  role = \"master\"\n\
                                  server_id = 1\n\
                                  password = \"changeme\"\n"
            .to_string(),
        Some(RoleArg::Slave) => "[replication]\n\
                                 role = \"slave\"\n\
                                 server_id = 2\n\
                                 password = \"changeme\"\n\
                                 master_host = \"db1.example.com\"\n\
                                 master_port = 3306\n"
            .to_string(),
    };

    let config_content = format!(
        r#"# myconverge Configuration
# Generated configuration file

[instance]
name = "default"
port = 3306
root_password = "changeme"
# credential_file = "/root/.my.cnf"

[tmpdir]
enabled = false
path = "/var/mysqltmp"
size = "2G"

[charset]
charset = "utf8"
collation = "utf8_general_ci"

[tuning]
auto = true
# max_connections = 500
# expire_logs_days = 7

{replication}
[database]
backend = "client"
client_binary = "/usr/bin/mysql"

[logging]
level = "info"
format = "pretty"
"#
    );

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to set passwords and replication settings.");
    println!("Preview with: myconverge --config {} plan", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: &Path, overrides: &OverrideArgs) -> Result<()> {
    let result = load_config(config_path, overrides).and_then(|config| {
        let options = config.instance_options()?;
        Ok((config, options))
    });

    match result {
        Ok((config, options)) => {
            println!("✓ Configuration is valid");
            println!("  Instance:   {} (port {})", options.name, options.port);
            println!("  Credential: {}", options.credential_file.display());
            match config.replication_role()? {
                Some(role) => println!("  Replication: {}", role.kind_name()),
                None => println!("  Replication: none"),
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show resolved configuration and tuning
fn run_info(config_path: &Path, overrides: &OverrideArgs) -> Result<()> {
    let config = load_config(config_path, overrides)?;
    let options = config.instance_options()?;
    let tuned = tuning::auto_tune();

    println!("myconverge Instance Information");
    println!("===============================");
    println!();
    println!("Instance:         {}", options.name);
    println!("Service:          {}", options.service_name());
    println!("Port:             {}", options.port);
    println!("Include Dir:      {}", options.include_dir().display());
    println!("Credential File:  {}", options.credential_file.display());
    println!();
    println!("Temporary Directory:");
    if config.tmpdir.enabled {
        println!("  Path:           {}", config.tmpdir.path.display());
        println!("  Size:           {}", config.tmpdir.size);
    } else {
        println!("  (disabled)");
    }
    println!();
    println!("Charset:          {} / {}", config.charset.charset, config.charset.collation);
    println!();
    println!("Tuning:");
    println!("{}", tuning::tuning_summary(&tuned));
    let set = tuning::build_tuning_set(&config.tuning, Some(&tuned));
    for (file, content) in set.render() {
        println!();
        println!("--- {} ---", file);
        print!("{}", content);
    }

    if let Some(role) = config.replication_role()? {
        println!();
        println!("Replication:");
        println!("  Role:           {}", role.kind_name());
        println!("  Server ID:      {}", role.server_id());
        println!("  Log Dir:        {}", options.log_dir().display());
        if let ReplicationRole::Slave { master, .. } = &role {
            match master.port() {
                Some(port) => println!("  Master:         {}:{}", master.host(), port),
                None => println!("  Master:         {}", master.host()),
            }
        }
    }

    Ok(())
}

/// Print the replication statements
fn run_show_sql(config_path: &Path, overrides: &OverrideArgs) -> Result<()> {
    let config = load_config(config_path, overrides)?;

    let role = match config.replication_role()? {
        Some(role) => role,
        None => {
            println!("-- No replication configured; no statements are sent.");
            return Ok(());
        }
    };

    println!("-- unless `{}` returns User = '{}':", replication::USER_PROBE, replication::REPLICATION_USER);
    for statement in replication::create_user_statements(role.password()) {
        println!("{};", statement);
    }

    if let ReplicationRole::Slave { master, password, .. } = &role {
        println!();
        println!(
            "-- unless `{}` reports {}:",
            replication::SLAVE_STATUS_PROBE,
            replication::IO_STATE_FIELD
        );
        println!("{}", replication::bootstrap_script(master, password));
    }

    Ok(())
}
