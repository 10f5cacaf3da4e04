use super::context::WorkflowContext;
use super::error::{ErrorList, ProvisionError};
use super::steps::{Step, StepContext, StepRef};
use anyhow::Context;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};

/// 워크플로 전체를 실행한다.
///
/// 모든 Step을 populate한 뒤 의존 순서대로 validate하고, 선행 Step이 끝난 Step부터
/// 동시에 run한다. 하나라도 실패하면 취소 신호를 보내고 새 Step을 시작하지 않는다.
/// 끝나기 전에 추적 중인 백그라운드 태스크가 모두 종료될 때까지 기다린다.
pub async fn run_workflow(wf: Arc<WorkflowContext>, steps: Vec<Step>) -> anyhow::Result<()> {
    info!(workflow = wf.name(), id = wf.id(), "워크플로를 시작합니다.");
    let result = drive(&wf, steps).await;
    wf.shutdown().await;
    for (kind, resource) in wf.registries().cleanup_candidates() {
        info!(kind = %kind, link = %resource.link, "정리 대상 리소스");
    }
    match &result {
        Ok(()) => info!(workflow = wf.name(), "워크플로가 완료되었습니다."),
        Err(err) => error!(workflow = wf.name(), "워크플로 실패: {err:#}"),
    }
    result
}

async fn drive(wf: &Arc<WorkflowContext>, steps: Vec<Step>) -> anyhow::Result<()> {
    let order = dependency_order(&steps).context("Step 의존 관계가 잘못되었습니다.")?;
    let refs = step_refs(&steps, &order);
    let mut by_id: HashMap<String, Step> =
        steps.into_iter().map(|step| (step.id.clone(), step)).collect();

    let mut errs = ErrorList::new();
    for id in &order {
        if let Some(step) = by_id.get_mut(id) {
            let ctx = StepContext::new(wf.clone(), refs[id].clone());
            errs.absorb(step.action.populate(&ctx).await);
        }
    }
    errs.into_result().context("워크플로 populate 실패")?;

    let mut errs = ErrorList::new();
    for id in &order {
        if let Some(step) = by_id.get(id) {
            let ctx = StepContext::new(wf.clone(), refs[id].clone());
            errs.absorb(step.action.validate(&ctx).await);
        }
    }
    errs.into_result().context("워크플로 validate 실패")?;

    let mut pending: Vec<Arc<Step>> = order
        .iter()
        .filter_map(|id| by_id.remove(id))
        .map(Arc::new)
        .collect();
    let mut succeeded: HashSet<String> = HashSet::new();
    let mut failure: Option<anyhow::Error> = None;
    type RunningHandle = tokio::task::JoinHandle<(String, Result<(), anyhow::Error>)>;
    let mut running: FuturesUnordered<RunningHandle> = FuturesUnordered::new();
    loop {
        if failure.is_none() && !wf.is_cancelled() {
            let (ready, blocked): (Vec<_>, Vec<_>) = pending
                .into_iter()
                .partition(|step| step.depends_on.iter().all(|dep| succeeded.contains(dep)));
            pending = blocked;
            for step in ready {
                let ctx = StepContext::new(wf.clone(), refs[&step.id].clone());
                running.push(tokio::spawn(run_step(step, ctx)));
            }
        }
        let Some(joined) = running.next().await else {
            break;
        };
        match joined {
            Ok((id, Ok(()))) => {
                info!(step = %id, "Step 완료");
                succeeded.insert(id);
            }
            Ok((id, Err(err))) => {
                error!(step = %id, "Step 실패: {err:#}");
                if failure.is_none() {
                    failure = Some(err);
                    wf.cancel();
                }
            }
            Err(join_err) => {
                if failure.is_none() {
                    failure = Some(anyhow::anyhow!("Step 태스크가 비정상 종료되었습니다: {join_err}"));
                    wf.cancel();
                }
            }
        }
    }

    if let Some(err) = failure {
        return Err(err);
    }
    if wf.is_cancelled() {
        let skipped: Vec<&str> = pending.iter().map(|step| step.id.as_str()).collect();
        warn!(?skipped, "워크플로가 취소되었습니다.");
        anyhow::bail!("워크플로가 취소되었습니다.");
    }
    Ok(())
}

/// Step 하나를 제한 시간 안에서 실행한다.
async fn run_step(step: Arc<Step>, ctx: StepContext) -> (String, Result<(), anyhow::Error>) {
    info!(step = %step.id, "Step 실행 시작");
    let result = match tokio::time::timeout(step.timeout, step.action.run(&ctx)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(anyhow::Error::new(err).context(format!("Step {:?} 실행 실패", step.id))),
        Err(_) => Err(anyhow::anyhow!(
            "Step {:?} 실행이 {:?} 후 시간 초과되었습니다.",
            step.id,
            step.timeout
        )),
    };
    (step.id.clone(), result)
}

/// 선언 순서를 최대한 유지하는 위상 정렬 결과를 반환한다.
fn dependency_order(steps: &[Step]) -> Result<Vec<String>, ErrorList> {
    let mut errs = ErrorList::new();
    let mut ids: HashSet<&str> = HashSet::new();
    for step in steps {
        if !ids.insert(step.id.as_str()) {
            errs.push(ProvisionError::Validation(format!(
                "Step ID {:?}가 중복되었습니다.",
                step.id
            )));
        }
    }
    for step in steps {
        for dep in &step.depends_on {
            if !ids.contains(dep.as_str()) {
                errs.push(ProvisionError::Validation(format!(
                    "Step {:?}가 존재하지 않는 Step {dep:?}에 의존합니다.",
                    step.id
                )));
            }
        }
    }
    if !errs.is_empty() {
        return Err(errs);
    }

    let mut order: Vec<String> = Vec::with_capacity(steps.len());
    let mut placed: HashSet<&str> = HashSet::new();
    while order.len() < steps.len() {
        let before = order.len();
        for step in steps {
            if placed.contains(step.id.as_str()) {
                continue;
            }
            if step.depends_on.iter().all(|dep| placed.contains(dep.as_str())) {
                placed.insert(step.id.as_str());
                order.push(step.id.clone());
            }
        }
        if order.len() == before {
            let cyclic: Vec<&str> = steps
                .iter()
                .map(|step| step.id.as_str())
                .filter(|id| !placed.contains(id))
                .collect();
            errs.push(ProvisionError::Validation(format!(
                "Step 의존 관계에 순환이 있습니다: {}",
                cyclic.join(", ")
            )));
            return Err(errs);
        }
    }
    Ok(order)
}

/// 각 Step이 직접 또는 간접적으로 의존하는 Step 집합을 계산한다.
fn step_refs(steps: &[Step], order: &[String]) -> HashMap<String, StepRef> {
    let deps: HashMap<&str, &Vec<String>> = steps
        .iter()
        .map(|step| (step.id.as_str(), &step.depends_on))
        .collect();
    let mut ancestors: HashMap<String, HashSet<String>> = HashMap::new();
    for id in order {
        let mut set = HashSet::new();
        for dep in deps.get(id.as_str()).copied().into_iter().flatten() {
            set.insert(dep.clone());
            if let Some(inherited) = ancestors.get(dep) {
                set.extend(inherited.iter().cloned());
            }
        }
        ancestors.insert(id.clone(), set);
    }
    ancestors
        .into_iter()
        .map(|(id, set)| (id.clone(), StepRef::new(id, set)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::testing::{FakeCompute, FakeStorage, TEST_DISK, TEST_PROJECT, TEST_ZONE, test_workflow};
    use crate::engine::steps::{CreateInstances, StepAction};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// 호출 순서를 기록하는 Step 동작이다.
    struct RecordingAction {
        log: Arc<Mutex<Vec<String>>>,
        fail_validate: bool,
        fail_run: bool,
        delay: Duration,
    }

    impl RecordingAction {
        fn new(log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                log: log.clone(),
                fail_validate: false,
                fail_run: false,
                delay: Duration::ZERO,
            }
        }

        fn record(&self, line: String) {
            self.log.lock().expect("log mutex poisoned").push(line);
        }
    }

    #[async_trait]
    impl StepAction for RecordingAction {
        async fn populate(&mut self, ctx: &StepContext) -> Result<(), ErrorList> {
            self.record(format!("populate:{}", ctx.step.id()));
            Ok(())
        }

        async fn validate(&self, ctx: &StepContext) -> Result<(), ErrorList> {
            self.record(format!("validate:{}", ctx.step.id()));
            if self.fail_validate {
                return Err(ProvisionError::Validation(format!("{} 검증 실패", ctx.step.id())).into());
            }
            if ctx.step.depends_on("a") {
                self.record(format!("ancestor:{}", ctx.step.id()));
            }
            Ok(())
        }

        async fn run(&self, ctx: &StepContext) -> Result<(), ProvisionError> {
            self.record(format!("run:{}", ctx.step.id()));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_run {
                return Err(ProvisionError::RemoteOperation(format!("{} 실행 실패", ctx.step.id())));
            }
            Ok(())
        }
    }

    fn step(id: &str, deps: &[&str], action: RecordingAction) -> Step {
        Step::new(
            id,
            deps.iter().map(|d| d.to_string()).collect(),
            Duration::from_secs(5),
            Box::new(action),
        )
    }

    fn workflow() -> Arc<WorkflowContext> {
        test_workflow(Arc::new(FakeCompute::new()), Arc::new(FakeStorage::new()))
    }

    fn lines(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        log.lock().expect("log mutex poisoned").clone()
    }

    /// 의존 순서대로 populate/validate/run 되고 간접 의존도 인식되는지 검증한다.
    #[tokio::test]
    async fn runs_steps_in_dependency_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let steps = vec![
            step("c", &["b"], RecordingAction::new(&log)),
            step("b", &["a"], RecordingAction::new(&log)),
            step("a", &[], RecordingAction::new(&log)),
        ];
        run_workflow(workflow(), steps).await.expect("워크플로 실패");

        assert_eq!(
            vec![
                "populate:a",
                "populate:b",
                "populate:c",
                "validate:a",
                "validate:b",
                "ancestor:b",
                "validate:c",
                "ancestor:c",
                "run:a",
                "run:b",
                "run:c",
            ],
            lines(&log)
        );
    }

    #[tokio::test]
    async fn validation_errors_prevent_any_run() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut broken = RecordingAction::new(&log);
        broken.fail_validate = true;
        let steps = vec![
            step("a", &[], RecordingAction::new(&log)),
            step("b", &[], broken),
        ];
        let err = run_workflow(workflow(), steps).await.expect_err("검증 실패가 무시되었습니다.");
        assert!(format!("{err:#}").contains("b 검증 실패"));
        assert!(!lines(&log).iter().any(|line| line.starts_with("run:")));
    }

    /// 실행 실패 시 워크플로가 취소되고 후속 Step은 시작되지 않는지 검증한다.
    #[tokio::test]
    async fn run_failure_cancels_and_skips_dependents() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut failing = RecordingAction::new(&log);
        failing.fail_run = true;
        let wf = workflow();
        let steps = vec![
            step("a", &[], failing),
            step("b", &["a"], RecordingAction::new(&log)),
        ];
        let err = run_workflow(wf.clone(), steps).await.expect_err("실행 실패가 무시되었습니다.");
        assert!(format!("{err:#}").contains("a 실행 실패"));
        assert!(wf.is_cancelled());
        assert!(!lines(&log).contains(&"run:b".to_string()));
    }

    #[tokio::test]
    async fn step_timeout_fails_workflow() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut slow = RecordingAction::new(&log);
        slow.delay = Duration::from_secs(5);
        let steps = vec![Step::new("slow", Vec::new(), Duration::from_millis(20), Box::new(slow))];
        let err = run_workflow(workflow(), steps).await.expect_err("시간 초과가 무시되었습니다.");
        assert!(err.to_string().contains("시간 초과"));
    }

    #[tokio::test]
    async fn dependency_cycles_are_rejected_before_populate() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let steps = vec![
            step("a", &["b"], RecordingAction::new(&log)),
            step("b", &["a"], RecordingAction::new(&log)),
            step("c", &["missing"], RecordingAction::new(&log)),
        ];
        let err = run_workflow(workflow(), steps).await.expect_err("잘못된 의존 관계가 허용되었습니다.");
        assert!(format!("{err:#}").contains("missing"));
        assert!(lines(&log).is_empty());

        let steps = vec![
            step("a", &["b"], RecordingAction::new(&log)),
            step("b", &["a"], RecordingAction::new(&log)),
        ];
        let err = run_workflow(workflow(), steps).await.expect_err("순환 의존이 허용되었습니다.");
        assert!(format!("{err:#}").contains("순환"));
        assert!(lines(&log).is_empty());
    }

    #[tokio::test]
    async fn cancelled_workflow_reports_cancellation() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let wf = workflow();
        wf.cancel();
        let steps = vec![step("a", &[], RecordingAction::new(&log))];
        let err = run_workflow(wf, steps).await.expect_err("취소가 무시되었습니다.");
        assert!(err.to_string().contains("취소"));
        assert!(!lines(&log).contains(&"run:a".to_string()));
    }

    /// 인스턴스 생성 Step이 워크플로 안에서 끝까지 실행되는지 검증한다.
    #[tokio::test]
    async fn create_instances_step_runs_end_to_end() {
        let compute = Arc::new(FakeCompute::new());
        let wf = test_workflow(compute.clone(), Arc::new(FakeStorage::new()));
        let yaml = format!(
            "- name: vm\n  disks:\n    - source: projects/{TEST_PROJECT}/zones/{TEST_ZONE}/disks/{TEST_DISK}\n"
        );
        let instances: CreateInstances = serde_yaml::from_str(&yaml).expect("설명자 파싱 실패");
        let steps = vec![Step::new(
            "create",
            Vec::new(),
            Duration::from_secs(5),
            Box::new(instances),
        )];
        run_workflow(wf.clone(), steps).await.expect("워크플로 실패");

        assert_eq!(vec!["vm-test-wf-abcde".to_string()], compute.created_names());
        let candidates = wf.registries().cleanup_candidates();
        assert_eq!(1, candidates.len());
        assert_eq!("vm-test-wf-abcde", candidates[0].1.real_name);
    }
}
