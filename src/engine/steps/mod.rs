use super::context::WorkflowContext;
use super::error::{ErrorList, ProvisionError};
use crate::definition::{StepConfig, StepKind};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

mod create_instances;
mod serial_log;
pub(crate) mod utils;

pub use create_instances::CreateInstances;

/// 레지스트리에 기록되는 Step 식별자와 그 Step이 (간접적으로) 의존하는 Step 집합이다.
#[derive(Debug, Clone)]
pub struct StepRef {
    id: String,
    ancestors: Arc<HashSet<String>>,
}

impl StepRef {
    pub fn new(id: impl Into<String>, ancestors: impl IntoIterator<Item = String>) -> Self {
        Self {
            id: id.into(),
            ancestors: Arc::new(ancestors.into_iter().collect()),
        }
    }

    /// 의존 Step이 없는 식별자를 만든다.
    pub fn root(id: impl Into<String>) -> Self {
        Self::new(id, Vec::new())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// `other` Step에 직접 또는 간접적으로 의존하는지 확인한다.
    pub fn depends_on(&self, other: &str) -> bool {
        self.ancestors.contains(other)
    }
}

/// Step 각 단계에 전달되는 실행 컨텍스트이다.
#[derive(Clone)]
pub struct StepContext {
    /// 워크플로 공용 상태.
    pub workflow: Arc<WorkflowContext>,
    /// 현재 Step의 식별자.
    pub step: StepRef,
}

impl StepContext {
    pub fn new(workflow: Arc<WorkflowContext>, step: StepRef) -> Self {
        Self { workflow, step }
    }
}

/// populate → validate → run 세 단계를 구현하는 Step 동작이다.
#[async_trait]
pub trait StepAction: Send + Sync {
    /// 기본값과 이름, URL을 정규화한다. 원격 호출을 하지 않는다.
    async fn populate(&mut self, ctx: &StepContext) -> Result<(), ErrorList>;

    /// 사전 조건을 검사하고 레지스트리에 생성/사용을 등록한다.
    async fn validate(&self, ctx: &StepContext) -> Result<(), ErrorList>;

    /// 실제 원격 변경을 수행한다.
    async fn run(&self, ctx: &StepContext) -> Result<(), ProvisionError>;
}

/// 워크플로에서 실행되는 Step 한 건이다.
pub struct Step {
    /// 고유 Step ID.
    pub id: String,
    /// 선행 Step ID 목록.
    pub depends_on: Vec<String>,
    /// run 단계 제한 시간.
    pub timeout: Duration,
    /// 실제 동작 구현.
    pub action: Box<dyn StepAction>,
}

impl Step {
    pub fn new(
        id: impl Into<String>,
        depends_on: Vec<String>,
        timeout: Duration,
        action: Box<dyn StepAction>,
    ) -> Self {
        Self {
            id: id.into(),
            depends_on,
            timeout,
            action,
        }
    }

    /// 정의 파일의 Step 구성을 실행 가능한 Step으로 변환한다.
    pub fn from_config(config: StepConfig) -> Self {
        let action: Box<dyn StepAction> = match config.kind {
            StepKind::CreateInstances { instances } => Box::new(instances),
        };
        Self::new(
            config.id,
            config.depends_on,
            Duration::from_secs(config.timeout_sec.max(1)),
            action,
        )
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("depends_on", &self.depends_on)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
