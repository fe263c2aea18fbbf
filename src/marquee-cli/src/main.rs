use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use marquee_core::{init_logging, AppDirs, Config, ProviderContext};
use marquee_plugin::ExecPluginLoader;
use marquee_runtime::{
    DownloadInstaller, FilePreferenceStore, HttpManifestSource, InstalledProvider,
    ManifestSource, ProviderApiDirectory, ProviderManager, ProviderRegistry,
    ProviderTestResult, ProviderTester, ProviderUpdater, TestStatus, UpdateNotifier,
};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "marquee", version, about = "Provider plugin manager for Marquee")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Provider management commands
    #[command(subcommand)]
    Providers(ProvidersCommand),
}

#[derive(Debug, Subcommand)]
enum ProvidersCommand {
    /// List installed providers in priority order
    List,
    /// Install a provider listed in a remote manifest
    Install {
        id: String,
        /// URL of the manifest listing the provider
        #[arg(long = "from")]
        manifest_url: String,
        /// Skip the confirmation required by `warn_before_install`
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Uninstall a provider and delete its build
    Uninstall { id: String },
    /// Enable a disabled provider or disable an enabled one
    Toggle { id: String },
    /// Move a provider to another position (0-based)
    Move { from: usize, to: usize },
    /// Run the conformance script against installed providers
    Test {
        /// Providers to test (all installed when omitted)
        ids: Vec<String>,
    },
    /// Check installed providers for updates
    Update {
        /// Apply available updates instead of only reporting them
        #[arg(long)]
        apply: bool,
    },
}

struct Runtime {
    manager: Arc<ProviderManager>,
    manifests: Arc<dyn ManifestSource>,
}

impl Runtime {
    async fn start(config: &Config, dirs: &AppDirs) -> Result<Self> {
        let client = config
            .network
            .build_client()
            .context("failed to build HTTP client")?;

        let store = Arc::new(FilePreferenceStore::new(dirs.preferences_path()));
        let registry = Arc::new(ProviderRegistry::new(store)?);
        let directory = Arc::new(ProviderApiDirectory::new(
            registry.clone(),
            ProviderContext::new(client.clone()),
        ));
        let installer = Arc::new(DownloadInstaller::new(
            client.clone(),
            dirs.providers_dir(),
            Arc::new(ExecPluginLoader::new()),
        ));
        let manager = Arc::new(ProviderManager::new(registry, directory, installer));

        for failure in manager.load_installed().await {
            tracing::warn!(provider = %failure.provider, error = %failure.cause, "provider failed to load");
            eprintln!("warning: {failure}");
        }

        Ok(Self {
            manager,
            manifests: Arc::new(HttpManifestSource::new(client)),
        })
    }

    fn updater(&self, config: &Config) -> ProviderUpdater {
        ProviderUpdater::new(
            self.manager.clone(),
            self.manifests.clone(),
            config.providers.manifest_cache_ttl(),
        )
        .with_auto_update(config.providers.auto_update)
        .with_notifier(Arc::new(ConsoleNotifier))
    }
}

struct ConsoleNotifier;

impl UpdateNotifier for ConsoleNotifier {
    fn updates_available(&self, count: usize) {
        println!("{count} provider update(s) available. Run `marquee providers update --apply`.");
    }

    fn providers_updated(&self, count: usize) {
        println!("Updated {count} provider(s).");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut dirs = AppDirs::discover()?;
    let config = Config::load_or_default(&dirs)?;
    if let Some(dir) = &config.providers.directory {
        dirs = dirs.with_providers_dir(dir.clone());
    }
    let _logging = init_logging(&config.logging, &dirs)?;

    let Command::Providers(command) = cli.command;
    let runtime = Runtime::start(&config, &dirs).await?;
    let manager = &runtime.manager;

    match command {
        ProvidersCommand::List => {
            print_providers(&manager.registry().get_ordered_providers().await);
        }
        ProvidersCommand::Install {
            id,
            manifest_url,
            yes,
        } => {
            if config.providers.warn_before_install && !yes {
                bail!(
                    "providers run as trusted code on this machine; re-run with --yes to install {id}"
                );
            }
            let listed = runtime
                .manifests
                .fetch(&manifest_url)
                .await
                .with_context(|| format!("failed to read manifest {manifest_url}"))?;
            let Some(metadata) = listed.into_iter().find(|m| m.id == id) else {
                bail!("{id} is not listed in {manifest_url}");
            };
            manager.install(&metadata).await?;
            println!("Installed {} v{}", metadata.name, metadata.version_name);
        }
        ProvidersCommand::Uninstall { id } => {
            let metadata = manager.uninstall(&id).await?;
            println!("Uninstalled {}", metadata.name);
        }
        ProvidersCommand::Toggle { id } => match manager.toggle(&id).await? {
            Some(true) => println!("Enabled {id}"),
            Some(false) => println!("Disabled {id}"),
            None => println!("{id} is busy; try again"),
        },
        ProvidersCommand::Move { from, to } => {
            manager.registry().move_provider(from, to).await?;
            print_providers(&manager.registry().get_ordered_providers().await);
        }
        ProvidersCommand::Test { ids } => {
            let installed = manager.registry().get_ordered_providers().await;
            let targets = select_targets(installed, &ids)?;
            let tester = ProviderTester::new(manager.directory().clone(), config.tester.clone());
            tester.start(targets)?;

            tokio::select! {
                _ = tester.join() => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("test run interrupted");
                    tester.stop();
                }
            }
            print_results(&tester.results());
        }
        ProvidersCommand::Update { apply } => {
            let updater = runtime.updater(&config);
            let outcome = if apply {
                updater.apply_all_updates(true).await
            } else {
                updater.check_for_updates(true).await
            };
            if outcome.outdated.is_empty() && outcome.updated.is_empty() {
                println!("All providers are up to date.");
            }
            for failure in &outcome.failed {
                eprintln!("update failed: {failure}");
            }
        }
    }

    Ok(())
}

fn select_targets(
    installed: Vec<InstalledProvider>,
    ids: &[String],
) -> Result<Vec<marquee_core::ProviderMetadata>> {
    if ids.is_empty() {
        return Ok(installed.into_iter().map(|p| p.metadata).collect());
    }
    ids.iter()
        .map(|id| {
            installed
                .iter()
                .find(|p| p.id() == id)
                .map(|p| p.metadata.clone())
                .with_context(|| format!("{id} is not installed"))
        })
        .collect()
}

fn print_providers(providers: &[InstalledProvider]) {
    if providers.is_empty() {
        println!("No providers installed. Use `marquee providers install`.");
        return;
    }

    for (position, provider) in providers.iter().enumerate() {
        let marker = if provider.is_enabled() { "" } else { " (disabled)" };
        println!(
            "{position}. {} [{}] v{}{marker}",
            provider.metadata.name, provider.metadata.id, provider.metadata.version_name
        );
    }
}

fn status_label(status: TestStatus) -> &'static str {
    match status {
        TestStatus::Success => "ok",
        TestStatus::Failure => "FAIL",
        TestStatus::NotImplemented => "n/a",
        TestStatus::Running => "..",
    }
}

fn print_results(results: &[ProviderTestResult]) {
    for result in results {
        println!(
            "{} v{}: {}/{} passed",
            result.provider.name,
            result.provider.version_name,
            result.count(TestStatus::Success),
            result.outputs.len()
        );
        for case in &result.outputs {
            println!(
                "  [{:>4}] {} ({} ms) {}",
                status_label(case.status),
                case.name,
                case.time_taken.as_millis(),
                case.short_log
            );
        }
    }
}
