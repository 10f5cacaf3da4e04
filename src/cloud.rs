use async_trait::async_trait;
use std::sync::Arc;

mod dummy;
mod model;
#[cfg(test)]
pub(crate) mod testing;

pub use dummy::{DummyCompute, DummyStorage};
pub use model::{
    AccessConfig, AttachedDisk, InitializeParams, Instance, Metadata, MetadataItem,
    NetworkInterface, SerialPortOutput, ServiceAccount,
};

/// 원격 호출 실패를 표현한다.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    /// HTTP 상태 코드와 같은 원격 응답 코드. 전송 단계 실패면 `None`이다.
    pub code: Option<u16>,
    /// 오류 메시지.
    pub message: String,
}

impl RemoteError {
    /// 상태 코드를 포함한 오류를 생성한다.
    pub fn with_code(code: u16, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// 상태 코드 없는 오류를 생성한다.
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// 5xx 계열 서버 오류인지 확인한다.
    pub fn is_server_error(&self) -> bool {
        matches!(self.code, Some(code) if (500..=599).contains(&code))
    }
}

/// 원격 컨트롤 플레인 호출 계약이다.
///
/// 존재 확인 메서드는 부재를 `Ok(false)`로, 조회 자체의 실패를 `Err`로 구분한다.
#[async_trait]
pub trait ComputeClient: Send + Sync {
    /// 인스턴스를 생성하고 작업 완료까지 기다린다.
    async fn create_instance(
        &self,
        project: &str,
        zone: &str,
        instance: &Instance,
    ) -> Result<(), RemoteError>;

    /// `start` 오프셋부터 시리얼 포트 출력을 가져온다.
    async fn get_serial_port_output(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        port: i64,
        start: i64,
    ) -> Result<SerialPortOutput, RemoteError>;

    /// 인스턴스가 정지 상태인지 확인한다.
    async fn instance_stopped(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<bool, RemoteError>;

    async fn project_exists(&self, project: &str) -> Result<bool, RemoteError>;

    async fn zone_exists(&self, project: &str, zone: &str) -> Result<bool, RemoteError>;

    async fn machine_type_exists(
        &self,
        project: &str,
        zone: &str,
        machine_type: &str,
    ) -> Result<bool, RemoteError>;

    async fn instance_exists(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<bool, RemoteError>;

    async fn disk_exists(&self, project: &str, zone: &str, name: &str)
    -> Result<bool, RemoteError>;

    /// 이미지 존재 여부를 확인한다. 이미지 패밀리는 `family/<이름>` 형태로 전달된다.
    async fn image_exists(&self, project: &str, name: &str) -> Result<bool, RemoteError>;

    async fn network_exists(&self, project: &str, name: &str) -> Result<bool, RemoteError>;
}

/// 오브젝트 스토리지 쓰기 계약이다.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// `bucket/object` 위치에 데이터를 덮어쓴다.
    async fn write_object(
        &self,
        bucket: &str,
        object: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), RemoteError>;
}

/// ComputeClient를 공유하기 위한 Arc 타입 별칭이다.
pub type SharedCompute = Arc<dyn ComputeClient>;

/// StorageClient를 공유하기 위한 Arc 타입 별칭이다.
pub type SharedStorage = Arc<dyn StorageClient>;
