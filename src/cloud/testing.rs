//! 테스트 전용 원격 클라이언트 목업.

use super::{ComputeClient, Instance, RemoteError, SerialPortOutput, StorageClient};
use crate::engine::{WorkflowContext, WorkflowSettings};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) const TEST_WF: &str = "test-wf";
pub(crate) const TEST_PROJECT: &str = "test-project";
pub(crate) const TEST_ZONE: &str = "test-zone";
pub(crate) const TEST_DISK: &str = "test-disk";
pub(crate) const TEST_IMAGE: &str = "test-image";
pub(crate) const TEST_FAMILY: &str = "test-family";
pub(crate) const TEST_MACHINE_TYPE: &str = "test-machine-type";
pub(crate) const TEST_NETWORK: &str = "test-network";
/// 네트워크만 빌려 쓰는 공유 VPC 호스트 프로젝트.
pub(crate) const TEST_SHARED_PROJECT: &str = "shared-project";
pub(crate) const TEST_GCS_PATH: &str = "gs://test-bucket";

/// 호출을 기록하고 정해진 응답을 돌려주는 ComputeClient 목업이다.
#[derive(Default)]
pub(crate) struct FakeCompute {
    /// 인스턴스 생성 호출마다 기다릴 시간.
    pub create_delay: Duration,
    /// 이 접두어로 시작하는 인스턴스 생성은 실패한다.
    pub fail_create_prefix: Option<String>,
    /// 프로젝트 조회 자체를 실패시킨다.
    pub fail_project_lookup: bool,
    /// `instance_stopped` 응답. `None`이면 조회 실패이다.
    pub stopped: Option<bool>,
    /// 시리얼 출력 응답 순서. 비면 조회 실패를 돌려준다.
    pub serial_script: Mutex<VecDeque<Result<SerialPortOutput, RemoteError>>>,
    pub create_started: AtomicUsize,
    pub create_finished: AtomicUsize,
    pub serial_calls: AtomicUsize,
    pub stopped_calls: AtomicUsize,
    /// 생성 요청된 인스턴스와 시리얼 조회 오프셋 기록.
    pub created: Mutex<Vec<Instance>>,
    pub serial_offsets: Mutex<Vec<i64>>,
}

impl FakeCompute {
    pub fn new() -> Self {
        Self {
            stopped: Some(false),
            ..Self::default()
        }
    }

    pub fn push_serial(&self, response: Result<SerialPortOutput, RemoteError>) {
        self.serial_script
            .lock()
            .expect("serial_script mutex poisoned")
            .push_back(response);
    }

    pub fn created_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .created
            .lock()
            .expect("created mutex poisoned")
            .iter()
            .map(|i| i.name.clone())
            .collect();
        names.sort();
        names
    }
}

fn check_location(project: &str, zone: Option<&str>) -> Result<(), RemoteError> {
    if project != TEST_PROJECT {
        return Err(RemoteError::with_code(400, format!("bad project: {project}")));
    }
    match zone {
        Some(zone) if zone != TEST_ZONE => {
            Err(RemoteError::with_code(400, format!("bad zone: {zone}")))
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl ComputeClient for FakeCompute {
    async fn create_instance(
        &self,
        _project: &str,
        _zone: &str,
        instance: &Instance,
    ) -> Result<(), RemoteError> {
        self.create_started.fetch_add(1, Ordering::SeqCst);
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        self.created
            .lock()
            .expect("created mutex poisoned")
            .push(instance.clone());
        self.create_finished.fetch_add(1, Ordering::SeqCst);
        match &self.fail_create_prefix {
            Some(prefix) if instance.name.starts_with(prefix.as_str()) => Err(
                RemoteError::with_code(400, format!("create failed: {}", instance.name)),
            ),
            _ => Ok(()),
        }
    }

    async fn get_serial_port_output(
        &self,
        _project: &str,
        _zone: &str,
        _name: &str,
        _port: i64,
        start: i64,
    ) -> Result<SerialPortOutput, RemoteError> {
        self.serial_calls.fetch_add(1, Ordering::SeqCst);
        self.serial_offsets
            .lock()
            .expect("serial_offsets mutex poisoned")
            .push(start);
        self.serial_script
            .lock()
            .expect("serial_script mutex poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(RemoteError::with_code(404, "serial port unavailable")))
    }

    async fn instance_stopped(
        &self,
        _project: &str,
        _zone: &str,
        _name: &str,
    ) -> Result<bool, RemoteError> {
        self.stopped_calls.fetch_add(1, Ordering::SeqCst);
        self.stopped
            .ok_or_else(|| RemoteError::with_code(500, "instance lookup failed"))
    }

    async fn project_exists(&self, project: &str) -> Result<bool, RemoteError> {
        if self.fail_project_lookup {
            return Err(RemoteError::with_code(503, "project lookup unavailable"));
        }
        Ok(project == TEST_PROJECT)
    }

    async fn zone_exists(&self, project: &str, zone: &str) -> Result<bool, RemoteError> {
        check_location(project, None)?;
        Ok(zone == TEST_ZONE)
    }

    async fn machine_type_exists(
        &self,
        project: &str,
        zone: &str,
        machine_type: &str,
    ) -> Result<bool, RemoteError> {
        check_location(project, Some(zone))?;
        Ok(matches!(machine_type, TEST_MACHINE_TYPE | "n1-standard-1"))
    }

    async fn instance_exists(
        &self,
        project: &str,
        zone: &str,
        _name: &str,
    ) -> Result<bool, RemoteError> {
        check_location(project, Some(zone))?;
        Ok(false)
    }

    async fn disk_exists(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<bool, RemoteError> {
        check_location(project, Some(zone))?;
        Ok(name == TEST_DISK)
    }

    async fn image_exists(&self, project: &str, name: &str) -> Result<bool, RemoteError> {
        check_location(project, None)?;
        Ok(name == TEST_IMAGE || name == format!("family/{TEST_FAMILY}"))
    }

    async fn network_exists(&self, project: &str, name: &str) -> Result<bool, RemoteError> {
        if project != TEST_SHARED_PROJECT {
            check_location(project, None)?;
        }
        Ok(matches!(name, TEST_NETWORK | "default"))
    }
}

/// 기록 요청을 보관하는 StorageClient 목업이다.
#[derive(Default)]
pub(crate) struct FakeStorage {
    /// 기록 시도마다 순서대로 돌려줄 실패. 비면 성공한다.
    pub failures: Mutex<VecDeque<RemoteError>>,
    /// 성공한 기록의 (오브젝트 경로, 내용) 목록.
    pub writes: Mutex<Vec<(String, String)>>,
    pub attempts: AtomicUsize,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_failure(&self, err: RemoteError) {
        self.failures
            .lock()
            .expect("failures mutex poisoned")
            .push_back(err);
    }

    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes.lock().expect("writes mutex poisoned").clone()
    }
}

#[async_trait]
impl StorageClient for FakeStorage {
    async fn write_object(
        &self,
        _bucket: &str,
        object: &str,
        data: &[u8],
        _content_type: &str,
    ) -> Result<(), RemoteError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self
            .failures
            .lock()
            .expect("failures mutex poisoned")
            .pop_front()
        {
            return Err(err);
        }
        self.writes.lock().expect("writes mutex poisoned").push((
            object.to_string(),
            String::from_utf8_lossy(data).to_string(),
        ));
        Ok(())
    }
}

/// 테스트 상수로 채운 워크플로 컨텍스트를 만든다.
pub(crate) fn test_workflow(
    compute: Arc<FakeCompute>,
    storage: Arc<FakeStorage>,
) -> Arc<WorkflowContext> {
    let mut settings = WorkflowSettings::new(TEST_WF, TEST_PROJECT, TEST_ZONE, TEST_GCS_PATH);
    settings.id = Some("abcde".into());
    settings.username = Some("tester".into());
    settings.serial_log_interval = Duration::from_millis(10);
    settings
        .sources
        .insert("startup.sh".into(), "./scripts/startup.sh".into());
    Arc::new(
        WorkflowContext::new(settings, compute, storage).expect("테스트 워크플로 생성 실패"),
    )
}
