use marquee_core::ProviderMetadata;
use std::cmp::Ordering;

/// Progress of a test run.
///
/// Stages order by position in the run: first by stage, then by the id of
/// the provider on test, with no provider first. Two stages are equal when
/// they sit at the same position, whatever the rest of the metadata says.
#[derive(Debug, Clone, Default)]
pub enum TestStage {
    #[default]
    Idle,
    /// Looking up the provider and its API.
    Stage1(Option<ProviderMetadata>),
    /// Running the provider's test cases.
    Stage2(Option<ProviderMetadata>),
}

impl TestStage {
    pub fn index(&self) -> u8 {
        match self {
            TestStage::Idle => 0,
            TestStage::Stage1(_) => 1,
            TestStage::Stage2(_) => 2,
        }
    }

    pub fn provider(&self) -> Option<&ProviderMetadata> {
        match self {
            TestStage::Idle => None,
            TestStage::Stage1(provider) | TestStage::Stage2(provider) => provider.as_ref(),
        }
    }

    fn provider_id(&self) -> Option<&str> {
        self.provider().map(|p| p.id.as_str())
    }
}

impl Ord for TestStage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index()
            .cmp(&other.index())
            .then_with(|| self.provider_id().cmp(&other.provider_id()))
    }
}

impl PartialOrd for TestStage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TestStage {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TestStage {}

/// Whether the background worker is advancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestJobState {
    #[default]
    Idle,
    Running,
    Paused,
}
