//! mpclient - command-line client for management point messaging

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use mpclient_cli::commands::content_location::{request_content_location, ContentLocationOutcome};
use mpclient_cli::commands::discover::{send_discovery, DiscoveryOutcome};
use mpclient_cli::commands::identity::{create_identity, show_identity, summarize};
use mpclient_cli::commands::policy::{collect_secrets, decrypt_into};
use mpclient_cli::commands::register::register;
use mpclient_cli::commands::wait_member::{describe_query, wait_member};
use mpclient_cli::commands::{acquire_identity, default_fqdn, IdentityArgs, Session};
use mpclient_cli::config::{FileConfig, Overrides, Scheme, Settings};
use mpclient_cli::local::{self, RepositoryFile, DEFAULT_REPOSITORY_PATH};
use mpclient_cli::output::ArtifactWriter;
use mpclient_cli::recovered::Recovered;
use mpclient_cli::resolver::PolicyTarget;
use mpclient_cli::shutdown::ShutdownCoordinator;
use mpclient_cli::store::KeyStore;
use mpclient_cli::transport::RelayTarget;
use mpclient_cli::waiter::WaitStatus;
use mpclient_cli::ClientError;
use mpclient_core::secrets::BlobSource;
use mpclient_core::{CollectionRef, ExpectedChange, ResourceKind, ResourceMatch};
use tracing_subscriber::EnvFilter;

/// mpclient - talk to a management point as a managed client
#[derive(Parser)]
#[command(name = "mpclient", version, about)]
struct Cli {
    /// Debug logging and full error chains
    #[arg(long, global = true)]
    debug: bool,

    /// Config file (default: platform config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Identity key store directory (default: platform data directory)
    #[arg(long, global = true, value_name = "DIR")]
    key_store: Option<PathBuf>,

    /// Management point host
    #[arg(short = 'm', long, global = true)]
    management_point: Option<String>,

    /// Site code
    #[arg(short = 's', long, global = true)]
    site_code: Option<String>,

    /// Management point port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// http or https
    #[arg(long, global = true, value_enum)]
    scheme: Option<Scheme>,

    /// Pin the management point certificate to this key fingerprint
    #[arg(long, global = true, value_name = "HEX")]
    server_fingerprint: Option<String>,

    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage local identities
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },

    /// Register a fresh identity and print its certificate and client id
    Register {
        /// Client name to register as
        #[arg(long)]
        name: String,

        /// Fully qualified name (default: NAME.local)
        #[arg(long)]
        fqdn: Option<String>,
    },

    /// Send a discovery record
    Discover {
        /// Client name in the record
        #[arg(long)]
        name: String,

        #[arg(long)]
        fqdn: Option<String>,

        /// IP address to report (repeatable)
        #[arg(long = "ip", value_name = "ADDR")]
        ip_addresses: Vec<IpAddr>,

        /// Have the server authenticate to HOST or HOST@PORT instead
        #[arg(long, value_name = "HOST[@PORT]")]
        relay: Option<String>,

        #[command(flatten)]
        identity: IdentityFlags,
    },

    /// Policy operations
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },

    /// Secrets cached by the client on this host (requires administrator)
    Local {
        #[command(subcommand)]
        action: LocalAction,
    },

    /// Request content locations for a package
    ContentLocation {
        /// Package ID
        #[arg(long)]
        package: String,

        /// Package version
        #[arg(long)]
        version: u32,

        /// Have the server authenticate to HOST or HOST@PORT instead
        #[arg(long, value_name = "HOST[@PORT]")]
        relay: Option<String>,

        #[command(flatten)]
        identity: IdentityFlags,
    },

    /// Wait until a collection gains or loses a member
    WaitMember {
        /// Collection ID
        #[arg(long)]
        collection: String,

        /// Resource ID or name expected to appear
        #[arg(long, conflicts_with = "removed", required_unless_present = "removed")]
        added: Option<String>,

        /// Resource ID or name expected to disappear
        #[arg(long)]
        removed: Option<String>,

        /// Give up after this many seconds (default: from config, 15)
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Print the membership query and exit
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum IdentityAction {
    /// Generate and store a new identity
    Create,

    /// Describe a certificate and whether its key is stored locally
    Show {
        #[arg(long, value_name = "HEX")]
        certificate: String,
    },
}

#[derive(Subcommand)]
enum PolicyAction {
    /// Resolve policy and list every protected secret
    Secrets {
        /// Machine or user policy
        #[arg(long, value_enum, default_value = "machine")]
        kind: KindArg,

        /// Client name sent with the request (default: the registered name)
        #[arg(long)]
        name: Option<String>,

        /// User SID for user policy
        #[arg(long, value_name = "SID")]
        user_sid: Option<String>,

        /// Write policy bodies and a summary into this directory
        #[arg(long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Only fetch bodies of assignments flagged as carrying secrets
        #[arg(long)]
        only_flagged: bool,

        /// Decrypt with this host's data-protection facility
        #[arg(long)]
        decrypt: bool,

        #[command(flatten)]
        identity: IdentityFlags,
    },
}

#[derive(Subcommand)]
enum LocalAction {
    /// Recover network access account, task sequence and collection variable secrets
    Secrets {
        /// Where to read the protected blobs from
        #[arg(long, value_enum)]
        method: MethodArg,

        /// Elevate by duplicating a SYSTEM token instead of relaxing the secrets ACL
        #[arg(long)]
        get_system: bool,

        /// Object repository to scan with --method disk
        #[arg(long, value_name = "PATH", default_value = DEFAULT_REPOSITORY_PATH)]
        store: PathBuf,

        /// List the blobs without decrypting (disk only)
        #[arg(long)]
        ciphertext_only: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MethodArg {
    /// The running client's configuration objects
    Live,
    /// The on-disk object repository, including rotated and removed secrets
    Disk,
}

#[derive(Args)]
struct IdentityFlags {
    /// Certificate of a registered identity (hex DER)
    #[arg(long, value_name = "HEX")]
    certificate: Option<String>,

    /// Client id bound to --certificate
    #[arg(long, value_name = "GUID:..")]
    client_id: Option<String>,

    /// Register a fresh identity under this name first
    #[arg(long, value_name = "NAME")]
    register: Option<String>,
}

impl IdentityFlags {
    fn to_args(&self) -> IdentityArgs {
        IdentityArgs {
            certificate: self.certificate.clone(),
            client_id: self.client_id.clone(),
            register: self.register.clone(),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Machine,
    User,
}

impl From<KindArg> for ResourceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Machine => ResourceKind::Machine,
            KindArg::User => ResourceKind::User,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(&cli)) {
        report_error(&e, cli.debug);
        std::process::exit(1);
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// One line normally; the cause chain and error kind under `--debug`.
fn report_error(e: &anyhow::Error, debug: bool) {
    eprintln!("error: {e:#}");
    if !debug {
        return;
    }
    if let Some(kind) = e.chain().find_map(|c| c.downcast_ref::<ClientError>()).map(ClientError::kind) {
        eprintln!("  kind: {kind:?}");
    }
    for (depth, cause) in e.chain().enumerate().skip(1) {
        eprintln!("  {depth}: {cause}");
    }
}

async fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Identity { action } => cmd_identity(cli, action),

        Commands::Register { name, fqdn } => cmd_register(cli, name, fqdn.as_deref()).await,

        Commands::Discover {
            name,
            fqdn,
            ip_addresses,
            relay,
            identity,
        } => {
            cmd_discover(
                cli,
                name,
                fqdn.as_deref(),
                ip_addresses.clone(),
                relay.as_deref(),
                identity,
            )
            .await
        }

        Commands::Policy {
            action:
                PolicyAction::Secrets {
                    kind,
                    name,
                    user_sid,
                    output,
                    only_flagged,
                    decrypt,
                    identity,
                },
        } => {
            cmd_policy_secrets(
                cli,
                (*kind).into(),
                name.as_deref(),
                user_sid.clone(),
                output.as_deref(),
                *only_flagged,
                *decrypt,
                identity,
            )
            .await
        }

        Commands::Local {
            action:
                LocalAction::Secrets {
                    method,
                    get_system,
                    store,
                    ciphertext_only,
                },
        } => cmd_local_secrets(cli, *method, *get_system, store, *ciphertext_only),

        Commands::ContentLocation {
            package,
            version,
            relay,
            identity,
        } => cmd_content_location(cli, package, *version, relay.as_deref(), identity).await,

        Commands::WaitMember {
            collection,
            added,
            removed,
            timeout,
            dry_run,
        } => {
            let expected = match (added, removed) {
                (Some(added), _) => ExpectedChange::Added(ResourceMatch::parse(added)),
                (None, Some(removed)) => ExpectedChange::Removed(ResourceMatch::parse(removed)),
                (None, None) => {
                    return Err(ClientError::invalid_arguments("use --added or --removed").into())
                }
            };
            cmd_wait_member(
                cli,
                CollectionRef::new(collection),
                expected,
                timeout.map(Duration::from_secs),
                *dry_run,
            )
            .await
        }
    }
}

fn key_store(cli: &Cli) -> Result<KeyStore> {
    let store = match &cli.key_store {
        Some(dir) => KeyStore::open(dir),
        None => KeyStore::open_default(),
    };
    store.context("Failed to open key store")
}

fn session(cli: &Cli) -> Result<Session> {
    let file = FileConfig::load(cli.config.as_deref()).map_err(ClientError::from)?;
    let overrides = Overrides {
        management_point: cli.management_point.clone(),
        site_code: cli.site_code.clone(),
        port: cli.port,
        scheme: cli.scheme,
        server_fingerprint: cli.server_fingerprint.clone(),
    }
    .with_env();
    let settings = Settings::resolve(file, overrides).map_err(ClientError::from)?;
    tracing::debug!(url = %settings.base_url(), site = %settings.site_code, "resolved settings");
    Ok(Session::new(settings)?)
}

fn relay_target(relay: Option<&str>) -> Result<Option<RelayTarget>> {
    relay
        .map(|r| r.parse::<RelayTarget>().map_err(ClientError::from))
        .transpose()
        .map_err(Into::into)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_identity(cli: &Cli, action: &IdentityAction) -> Result<()> {
    let store = key_store(cli)?;
    match action {
        IdentityAction::Create => {
            let identity = create_identity(&store)?;
            let summary = summarize(&identity);
            if cli.json {
                return print_json(&summary);
            }
            // Certificate to stdout (script-friendly)
            println!("{}", identity.certificate_hex());
            eprintln!("Fingerprint: {}", summary.fingerprint);
            eprintln!("Key stored in {}", store.dir().display());
        }
        IdentityAction::Show { certificate } => {
            let summary = show_identity(&store, certificate)?;
            if cli.json {
                return print_json(&summary);
            }
            println!("Fingerprint: {}", summary.fingerprint);
            println!("Subject:     {}", summary.subject);
            println!(
                "Private key: {}",
                if summary.key_stored { "stored" } else { "not found" }
            );
        }
    }
    Ok(())
}

async fn cmd_register(cli: &Cli, name: &str, fqdn: Option<&str>) -> Result<()> {
    let session = session(cli)?;
    let store = key_store(cli)?;

    let mut identity = create_identity(&store)?;
    let fqdn = fqdn.map_or_else(|| default_fqdn(name), str::to_string);
    let outcome = register(&session, &mut identity, name, &fqdn)
        .await
        .context("Registration failed")?;

    if cli.json {
        return print_json(&outcome);
    }
    println!("{}", outcome.client_id);
    println!("{}", outcome.certificate);
    eprintln!(
        "Registered {} ({})",
        name,
        if outcome.approved { "approved" } else { "pending approval" }
    );
    Ok(())
}

async fn cmd_discover(
    cli: &Cli,
    name: &str,
    fqdn: Option<&str>,
    ip_addresses: Vec<IpAddr>,
    relay: Option<&str>,
    identity_flags: &IdentityFlags,
) -> Result<()> {
    let relay = relay_target(relay)?;
    let plan = identity_flags.to_args().plan(false)?;
    let session = session(cli)?;
    let store = key_store(cli)?;
    let identity = acquire_identity(&session, &store, plan).await?;

    let fqdn = fqdn.map_or_else(|| default_fqdn(name), str::to_string);
    let outcome = send_discovery(&session, &identity, name, &fqdn, ip_addresses, relay.as_ref())
        .await
        .context("Discovery failed")?;

    if cli.json {
        return print_json(&outcome);
    }
    match outcome {
        DiscoveryOutcome::Acknowledged { client_id } => {
            println!("acknowledged");
            eprintln!("Discovery record for {name} accepted as {client_id}");
        }
        DiscoveryOutcome::RelayAccepted { target } => {
            println!("accepted");
            eprintln!("Server accepted the request naming {target}; check the listener");
        }
        DiscoveryOutcome::RelayRejected { target, status } => {
            println!("rejected");
            eprintln!("Server rejected the request naming {target} (status {status})");
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_policy_secrets(
    cli: &Cli,
    kind: ResourceKind,
    name: Option<&str>,
    user_sid: Option<String>,
    output: Option<&std::path::Path>,
    only_flagged: bool,
    decrypt: bool,
    identity_flags: &IdentityFlags,
) -> Result<()> {
    let args = identity_flags.to_args();
    let plan = args.plan(true)?;
    if kind == ResourceKind::User && user_sid.is_none() {
        return Err(ClientError::invalid_arguments("--kind user requires --user-sid").into());
    }
    // Checked before anything is sent.
    let facilities = decrypt
        .then(local::facilities)
        .transpose()
        .map_err(ClientError::from)?;

    let session = session(cli)?;
    let store = key_store(cli)?;
    let writer = output.map(ArtifactWriter::open).transpose()?;
    let identity = acquire_identity(&session, &store, plan).await?;

    let client_name = name
        .map(str::to_string)
        .or(args.register)
        .unwrap_or_else(|| identity.fingerprint().to_hex());
    let target = PolicyTarget {
        kind,
        fqdn: default_fqdn(&client_name),
        client_name,
        user_sid,
    };

    let (mut report, resolved) =
        collect_secrets(&session, &identity, &target, only_flagged, writer.as_ref())
            .await
            .context("Policy request failed")?;
    if let Some(facilities) = &facilities {
        decrypt_into(&mut report, &resolved, &*facilities.protection);
    }

    if cli.json {
        return print_json(&report);
    }

    eprintln!(
        "{} assignment(s), {} secret(s)",
        report.assignments.len(),
        report.secrets.len()
    );
    if !report.secrets.is_empty() {
        println!("{:<38}  {:<24}  {:<22}  {:<7}  {}", "POLICY", "NAME", "ORIGIN", "CONTEXT", "CIPHERTEXT");
        for secret in &report.secrets {
            println!(
                "{:<38}  {:<24}  {:<22}  {:<7}  {}",
                secret.policy_id,
                secret.name,
                secret.origin,
                format!("{:?}", secret.context).to_lowercase(),
                secret.ciphertext
            );
        }
    }
    for failure in &report.failures {
        eprintln!("warning: {}: {}", failure.policy_id, failure.error);
    }
    if let Some(decrypted) = &report.decrypted {
        print_recovered(decrypted);
    }
    for path in &report.artifacts {
        eprintln!("Wrote {}", path.display());
    }
    Ok(())
}

fn cmd_local_secrets(
    cli: &Cli,
    method: MethodArg,
    get_system: bool,
    store: &std::path::Path,
    ciphertext_only: bool,
) -> Result<()> {
    if method == MethodArg::Live && store != std::path::Path::new(DEFAULT_REPOSITORY_PATH) {
        return Err(ClientError::invalid_arguments("--store only applies to --method disk").into());
    }
    let repository = RepositoryFile::new(store);

    if ciphertext_only {
        if method == MethodArg::Live {
            return Err(ClientError::invalid_arguments("--ciphertext-only requires --method disk").into());
        }
        let protected = local::list_protected(&repository)
            .with_context(|| format!("Failed to scan {}", repository.path().display()))?;
        if cli.json {
            return print_json(&protected);
        }
        eprintln!("{} protected secret(s) in {}", protected.len(), repository.path().display());
        for secret in &protected {
            println!("{:<22}  {:<24}  {}", secret.origin, secret.name, secret.ciphertext);
        }
        return Ok(());
    }

    let facilities = local::facilities().map_err(ClientError::from)?;
    let live = facilities.live_store();
    let source: &dyn BlobSource = match method {
        MethodArg::Live => &live,
        MethodArg::Disk => &repository,
    };
    let report = local::recover_secrets(
        &*facilities.host,
        &*facilities.protection,
        source,
        local::tactic(get_system),
    )
    .context("Local secret recovery failed")?;

    if cli.json {
        return print_json(&report);
    }
    if let Some(tactic) = report.elevation {
        eprintln!("Elevated via {tactic:?}; host state restored");
    }
    print_recovered(&report.recovered);
    Ok(())
}

fn print_recovered(recovered: &Recovered) {
    eprintln!(
        "{} secret(s) decrypted, {} failed",
        recovered.secrets.len(),
        recovered.failures.len()
    );
    for secret in &recovered.secrets {
        println!("{:<22}  {:<24}  {}", secret.origin, secret.name, secret.value.display());
    }
    for failure in &recovered.failures {
        eprintln!("warning: {}: {}", failure.name, failure.error);
    }
}

async fn cmd_content_location(
    cli: &Cli,
    package: &str,
    version: u32,
    relay: Option<&str>,
    identity_flags: &IdentityFlags,
) -> Result<()> {
    let relay = relay_target(relay)?;
    let plan = identity_flags.to_args().plan(false)?;
    let session = session(cli)?;
    let store = key_store(cli)?;
    let identity = acquire_identity(&session, &store, plan).await?;

    let outcome = request_content_location(&session, &identity, package, version, relay.as_ref())
        .await
        .context("Content location request failed")?;

    if cli.json {
        return print_json(&outcome);
    }
    match outcome {
        ContentLocationOutcome::Locations { urls } => {
            if urls.is_empty() {
                eprintln!("No content locations for {package}");
            }
            for url in urls {
                println!("{url}");
            }
        }
        ContentLocationOutcome::RelayAccepted { target } => {
            println!("accepted");
            eprintln!("Server accepted the request naming {target}; check the listener");
        }
        ContentLocationOutcome::RelayRejected { target, status } => {
            println!("rejected");
            eprintln!("Server rejected the request naming {target} (status {status})");
        }
    }
    Ok(())
}

async fn cmd_wait_member(
    cli: &Cli,
    collection: CollectionRef,
    expected: ExpectedChange,
    timeout: Option<Duration>,
    dry_run: bool,
) -> Result<()> {
    if dry_run {
        println!("{}", describe_query(&collection));
        return Ok(());
    }

    let session = session(cli)?;
    let shutdown = ShutdownCoordinator::new().install_ctrl_c();
    let report = wait_member(&session, &collection, &expected, timeout, &shutdown).await?;

    if cli.json {
        return print_json(&report);
    }
    for record in report.snapshot.records() {
        println!("{}\t{}", record.resource_id, record.name);
    }
    let status = match report.status {
        WaitStatus::Converged => "change observed",
        WaitStatus::TimedOut => "timed out; showing last membership",
        WaitStatus::Cancelled => "cancelled; showing last membership",
    };
    eprintln!(
        "{collection}: {status} after {} poll(s), {:.1}s",
        report.polls,
        report.elapsed.as_secs_f64()
    );
    Ok(())
}
