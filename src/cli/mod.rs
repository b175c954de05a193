// CLI interface
pub mod commands;

use crate::account::{Account, MagnumAccount, MakeCoeAccount, MakeSwarmAccount};
use crate::client::Client;
use crate::error::{Error, Result};
use crate::models::CloudType;
use crate::version;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "coectl")]
#[command(about = "Create and interact with container orchestration clusters across clouds", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// The cloud type: magnum, make-swarm or make-coe (detected from the
    /// credentials when omitted)
    #[arg(long, global = true, env = "COECTL_CLOUD")]
    pub cloud: Option<String>,

    /// Username [COECTL_USERNAME/RS_USERNAME/OS_USERNAME]
    #[arg(long, global = true)]
    pub username: Option<String>,

    /// Public cloud API key [COECTL_APIKEY/RS_API_KEY]
    #[arg(long, global = true)]
    pub api_key: Option<String>,

    /// Private cloud password [OS_PASSWORD]
    #[arg(long, global = true)]
    pub password: Option<String>,

    /// Private cloud project name [OS_PROJECT_NAME]
    #[arg(long, global = true)]
    pub project: Option<String>,

    /// Private cloud domain name [OS_DOMAIN_NAME]
    #[arg(long, global = true)]
    pub domain: Option<String>,

    /// Region name [OS_REGION_NAME/RS_REGION_NAME]
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Authentication endpoint [OS_AUTH_URL/RS_AUTH_URL]
    #[arg(long, global = true)]
    pub auth_endpoint: Option<String>,

    /// Custom API endpoint [COECTL_ENDPOINT/OS_ENDPOINT]
    #[arg(long, global = true, hide = true)]
    pub endpoint: Option<String>,

    /// Do not cache API tokens or update-check times
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Enable verbose/debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a cluster
    Create {
        /// Name of the cluster
        name: String,

        /// Cluster template to create from (ignored by make-swarm)
        #[arg(long, default_value = "")]
        template: String,

        /// Number of nodes for the initial cluster
        #[arg(long, default_value_t = 1)]
        nodes: i64,

        /// Wait for the cluster to become active
        #[arg(long)]
        wait: bool,

        /// Give up waiting after this many seconds
        #[arg(long, requires = "wait")]
        timeout: Option<u64>,
    },

    /// Show information about a cluster
    Get {
        /// Cluster name or id
        name: String,

        /// Wait for the cluster to become active
        #[arg(long)]
        wait: bool,

        /// Give up waiting after this many seconds
        #[arg(long, requires = "wait")]
        timeout: Option<u64>,
    },

    /// List clusters
    #[command(alias = "list")]
    Ls,

    /// List the cluster templates available for creating clusters
    Templates,

    /// Add nodes to a cluster
    Grow {
        /// Cluster name or id
        name: String,

        /// Number of nodes to add
        #[arg(long)]
        nodes: i64,

        /// Wait for the cluster to become active
        #[arg(long)]
        wait: bool,

        /// Give up waiting after this many seconds
        #[arg(long, requires = "wait")]
        timeout: Option<u64>,
    },

    /// Destroy and recreate a cluster
    Rebuild {
        /// Cluster name or id
        name: String,

        /// Wait for the cluster to become active
        #[arg(long)]
        wait: bool,

        /// Give up waiting after this many seconds
        #[arg(long, requires = "wait")]
        timeout: Option<u64>,
    },

    /// Delete a cluster
    #[command(alias = "delete")]
    Rm {
        /// Cluster name or id
        name: String,

        /// Wait for the cluster to be gone
        #[arg(long)]
        wait: bool,

        /// Give up waiting after this many seconds
        #[arg(long, requires = "wait")]
        timeout: Option<u64>,
    },

    /// Download a cluster's credentials
    Credentials {
        /// Cluster name or id
        name: String,

        /// Full path to the directory where the credentials should be saved
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Show the command to load a cluster's credentials into the current shell
    Env {
        /// Cluster name or id
        name: String,

        /// The parent shell type: bash, fish, powershell or cmd [SHELL]
        #[arg(long)]
        shell: Option<String>,

        /// Full path to the directory from which the credentials should be loaded
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Enable or disable autoscaling on a cluster
    Autoscale {
        /// Cluster name or id
        name: String,

        /// on or off
        #[arg(value_parser = ["on", "off"])]
        setting: String,
    },

    /// Show the quotas for the account
    Quotas,

    /// Generate shell completion scripts
    Completions {
        /// Shell type to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

pub async fn execute(args: Cli) -> Result<()> {
    if let Commands::Completions { shell } = &args.command {
        commands::completions::execute(*shell);
        return Ok(());
    }

    let client = Client::new(!args.no_cache);
    version::check_for_updates(client.cache()).await;

    let mut account = resolve_account(&args)?;

    match args.command {
        Commands::Create {
            name,
            template,
            nodes,
            wait,
            timeout,
        } => {
            commands::create::execute(
                &client,
                &mut account,
                &name,
                &template,
                nodes,
                wait,
                wait_token(timeout),
            )
            .await
        }
        Commands::Get {
            name,
            wait,
            timeout,
        } => commands::get::execute(&client, &mut account, &name, wait, wait_token(timeout)).await,
        Commands::Ls => commands::list::execute(&client, &mut account).await,
        Commands::Templates => commands::templates::execute(&client, &mut account).await,
        Commands::Grow {
            name,
            nodes,
            wait,
            timeout,
        } => {
            commands::grow::execute(
                &client,
                &mut account,
                &name,
                nodes,
                wait,
                wait_token(timeout),
            )
            .await
        }
        Commands::Rebuild {
            name,
            wait,
            timeout,
        } => {
            commands::rebuild::execute(&client, &mut account, &name, wait, wait_token(timeout))
                .await
        }
        Commands::Rm {
            name,
            wait,
            timeout,
        } => {
            commands::delete::execute(&client, &mut account, &name, wait, wait_token(timeout)).await
        }
        Commands::Credentials { name, path } => {
            commands::credentials::execute(&client, &mut account, &name, path.as_deref()).await
        }
        Commands::Env { name, shell, path } => {
            commands::env::execute(&client, &mut account, &name, shell, path.as_deref()).await
        }
        Commands::Autoscale { name, setting } => {
            commands::autoscale::execute(&client, &mut account, &name, setting == "on").await
        }
        Commands::Quotas => commands::quotas::execute(&client, &mut account).await,
        Commands::Completions { .. } => unreachable!("handled before building the client"),
    }
}

/// Bound a wait through cancellation; the polling loops themselves carry no
/// timeout policy.
fn wait_token(timeout: Option<u64>) -> CancellationToken {
    let token = CancellationToken::new();
    if let Some(secs) = timeout {
        let deadline = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            deadline.cancel();
        });
    }
    token
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|value| !value.is_empty()))
}

/// Build the account from flags, falling back to the per-backend
/// environment-variable families.
fn resolve_account(args: &Cli) -> Result<Account> {
    let username = args
        .username
        .clone()
        .or_else(|| first_env(&["COECTL_USERNAME", "RS_USERNAME", "OS_USERNAME"]));
    let api_key = args
        .api_key
        .clone()
        .or_else(|| first_env(&["COECTL_APIKEY", "RS_API_KEY"]));
    let password = args.password.clone().or_else(|| first_env(&["OS_PASSWORD"]));
    let project = args
        .project
        .clone()
        .or_else(|| first_env(&["OS_PROJECT_NAME"]));
    let domain = args
        .domain
        .clone()
        .or_else(|| first_env(&["OS_DOMAIN_NAME"]));
    let region = args
        .region
        .clone()
        .or_else(|| first_env(&["OS_REGION_NAME", "RS_REGION_NAME"]));
    let auth_endpoint = args
        .auth_endpoint
        .clone()
        .or_else(|| first_env(&["OS_AUTH_URL", "RS_AUTH_URL"]));
    let endpoint = args
        .endpoint
        .clone()
        .or_else(|| first_env(&["COECTL_ENDPOINT", "OS_ENDPOINT"]));

    let cloud = match &args.cloud {
        Some(cloud) => cloud.parse::<CloudType>()?,
        None => detect_cloud(api_key.is_some(), password.is_some())?,
    };
    tracing::debug!("Cloud: {cloud}");

    let account = match cloud {
        CloudType::Magnum => Account::Magnum(MagnumAccount {
            auth_endpoint: auth_endpoint.unwrap_or_default(),
            endpoint_override: endpoint,
            username: username.unwrap_or_default(),
            password: password.unwrap_or_default(),
            project,
            domain,
            region,
            ..Default::default()
        }),
        CloudType::MakeSwarm => Account::MakeSwarm(MakeSwarmAccount {
            auth_endpoint,
            endpoint,
            username: username.unwrap_or_default(),
            api_key: api_key.unwrap_or_default(),
            ..Default::default()
        }),
        CloudType::MakeCoe => Account::MakeCoe(MakeCoeAccount {
            auth_endpoint,
            endpoint,
            username: username.unwrap_or_default(),
            api_key: api_key.unwrap_or_default(),
            ..Default::default()
        }),
    };

    Ok(account)
}

/// The credentials themselves identify the cloud: an API key means Carina,
/// a password means a private OpenStack cloud.
fn detect_cloud(has_api_key: bool, has_password: bool) -> Result<CloudType> {
    if has_api_key {
        tracing::debug!("Cloud: make-coe detected because an API key is present");
        Ok(CloudType::MakeCoe)
    } else if has_password {
        tracing::debug!("Cloud: magnum detected because a password is present");
        Ok(CloudType::Magnum)
    } else {
        Err(Error::Config(
            "Unable to detect the cloud type. Specify --cloud, or provide an API key or password"
                .to_string(),
        ))
    }
}
