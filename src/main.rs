mod config;
mod desired;
mod error;
mod gitlab;
mod models;
mod sync;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use desired::LoadOptions;
use gitlab::GitLabClient;
use models::Variable;
use sync::{PushOptions, VariableSet};

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "gitlab-dotenv")]
#[command(author, version, about = "Sync GitLab CI/CD variables with a local file", long_about = None)]
struct Cli {
    /// Project web URL, e.g. https://gitlab.com/group/project (overrides GITLAB_PROJECT_URL)
    #[arg(long)]
    project_url: Option<String>,

    /// Private access token (overrides GITLAB_TOKEN)
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Verify the project URL and token
    Check,

    /// List the variables currently on the project
    List {
        /// Print raw JSON records
        #[arg(long)]
        json: bool,
    },

    /// Show a single variable
    Get {
        key: String,
        /// Environment scope to select
        #[arg(long)]
        scope: Option<String>,
    },

    /// Show what a push of the given file would change
    Diff(SourceArgs),

    /// Apply the given file to the project
    Push {
        #[command(flatten)]
        source: SourceArgs,
        /// Don't create variables missing on the project
        #[arg(long)]
        no_create: bool,
        /// Overwrite variables whose content differs
        #[arg(long)]
        update: bool,
        /// Delete project variables absent from the file
        #[arg(long)]
        delete: bool,
    },
}

/// Desired-state file arguments
#[derive(Args, Debug)]
struct SourceArgs {
    /// JSON array of variable records, or a dotenv file
    file: PathBuf,
    /// Environment scope for dotenv entries
    #[arg(long, default_value = models::DEFAULT_ENVIRONMENT_SCOPE)]
    scope: String,
    /// Variable type for dotenv entries (env_var or file)
    #[arg(long, default_value = models::DEFAULT_VARIABLE_TYPE)]
    variable_type: String,
    /// Mark dotenv entries as protected
    #[arg(long)]
    protected: bool,
    /// Mark dotenv entries as masked
    #[arg(long)]
    masked: bool,
    /// Mark dotenv entries as raw (no variable expansion on the runner)
    #[arg(long)]
    raw: bool,
    /// Reject malformed JSON records instead of normalizing them
    #[arg(long)]
    strict: bool,
}

impl SourceArgs {
    fn load(&self) -> Result<Vec<Variable>> {
        desired::load(
            &self.file,
            &LoadOptions {
                scope: self.scope.clone(),
                variable_type: self.variable_type.clone(),
                protected: self.protected,
                masked: self.masked,
                raw: self.raw,
                strict: self.strict,
            },
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gitlab_dotenv=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            tracing::warn!("Failed to read .env: {}", e);
        }
    }

    let cli = Cli::parse();

    // Load configuration
    let mut cfg = Config::load();
    if let Some(url) = cli.project_url {
        cfg.project_url = url;
    }
    if let Some(token) = cli.token {
        cfg.token = token;
    }
    cfg.require()?;

    let client = GitLabClient::new(&cfg.project_url, cfg.token.clone(), cfg.timeout)
        .context("Failed to create GitLab client")?
        .with_per_page(cfg.per_page);
    tracing::debug!("Using API endpoint {}", client.base_url());

    match cli.command {
        Commands::Check => {
            if !client.test_connection().await {
                anyhow::bail!("Could not reach {}", client.base_url());
            }
            println!("OK: {}", client.base_url());
        }
        Commands::Get { key, scope } => {
            let record = client.get(&key, scope.as_deref()).await?;
            println!("{}", list_line(&Variable::from_value(&record)));
        }
        Commands::List { json } => {
            let set = VariableSet::initialize(client).await?;
            let vars = set.all();
            if json {
                println!("{}", serde_json::to_string_pretty(&vars)?);
            } else {
                for var in &vars {
                    println!("{}", list_line(var));
                }
            }
        }
        Commands::Diff(source) => {
            let wanted = source.load()?;
            let mut set = VariableSet::initialize(client).await?;
            set.replace_all(wanted);
            print_diff(&set);
        }
        Commands::Push {
            source,
            no_create,
            update,
            delete,
        } => {
            let wanted = source.load()?;
            let mut set = VariableSet::initialize(client).await?;
            set.replace_all(wanted);
            print_diff(&set);

            let options = PushOptions {
                allow_create: !no_create,
                allow_update: update,
                allow_delete: delete,
            };
            let report = set
                .push(options)
                .await
                .context("Push stopped part way; re-run once the cause is fixed")?;
            tracing::info!(
                "Pushed to {} ({} created, {} updated, {} deleted)",
                set.client().base_url(),
                report.created,
                report.updated,
                report.deleted
            );
        }
    }

    Ok(())
}

fn list_line(var: &Variable) -> String {
    let value = if var.masked() { "[masked]" } else { var.value() };
    let mut line = format!("{} = {}", var.uid(), value);

    let mut tags = Vec::new();
    if var.variable_type() != models::DEFAULT_VARIABLE_TYPE {
        tags.push(var.variable_type());
    }
    if var.protected() {
        tags.push("protected");
    }
    if var.masked() {
        tags.push("masked");
    }
    if var.raw() {
        tags.push("raw");
    }
    if !tags.is_empty() {
        line.push_str(&format!(" [{}]", tags.join(", ")));
    }
    if !var.description().is_empty() {
        line.push_str(&format!("  # {}", var.description()));
    }
    line
}

fn print_diff<C: sync::RemoteClient>(set: &VariableSet<C>) {
    let created = set.created();
    let changed = set.changed();
    let deleted = set.deleted();

    for var in &created {
        println!("+ {}", var.uid());
    }
    for var in &changed {
        println!("~ {}", var.uid());
    }
    for var in &deleted {
        println!("- {}", var.uid());
    }
    println!(
        "{} to create, {} to update, {} to delete",
        created.len(),
        changed.len(),
        deleted.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_line_hides_masked_values() {
        let var = Variable::new("TOKEN", "s3cret").with_masked(true).with_protected(true);
        let line = list_line(&var);
        assert_eq!(line, "* // TOKEN = [masked] [protected, masked]");
        assert!(!line.contains("s3cret"));
    }

    #[test]
    fn test_list_line_shows_type_and_description() {
        let var = Variable::from_value(&json!({
            "variable_type": "file",
            "key": "CA",
            "value": "pem",
            "description": "root cert",
        }));
        assert_eq!(list_line(&var), "* // CA = pem [file]  # root cert");
        assert_eq!(list_line(&Variable::new("A", "1")), "* // A = 1");
    }
}
