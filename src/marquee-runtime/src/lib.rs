pub mod directory;
pub mod factory;
pub mod guard;
pub mod installer;
pub mod manager;
pub mod preferences;
pub mod registry;
pub mod resolver;
pub mod tester;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod updater;

pub use directory::{ApiEvent, DirectoryError, ProviderApiDirectory};
pub use factory::{FactoryInstaller, ProviderFactories, ProviderFactory};
pub use installer::{DownloadInstaller, ProviderInstaller};
pub use manager::{ProviderLoadError, ProviderManager};
pub use preferences::{
    FilePreferenceStore, MemoryPreferenceStore, PreferenceError, PreferenceStore,
    ProviderPreference, ProviderPreferences,
};
pub use registry::{InstalledProvider, ProviderRegistry, RegistryError, RegistryEvent};
pub use resolver::{LinkResolver, ResolveError};
pub use tester::{
    ProviderTestCaseResult, ProviderTestResult, ProviderTester, TestCase, TestJobState, TestStage,
    TestStatus, TesterError,
};
pub use updater::{
    HttpManifestSource, ManifestCache, ManifestError, ManifestSource, ProviderUpdateError,
    ProviderUpdater, UpdateCheckOutcome, UpdateNotifier,
};
