use super::{ComputeClient, Instance, RemoteError, SerialPortOutput, StorageClient};
use async_trait::async_trait;
use tracing::info;

/// DummyCompute는 실제 API 호출 없이 요청을 로그로만 남기는 드라이런 구현이다.
///
/// 모든 존재 확인은 성공하며 시리얼 출력은 항상 비어 있다.
#[derive(Debug, Default, Clone)]
pub struct DummyCompute;

#[async_trait]
impl ComputeClient for DummyCompute {
    async fn create_instance(
        &self,
        project: &str,
        zone: &str,
        instance: &Instance,
    ) -> Result<(), RemoteError> {
        let body = serde_json::to_string(instance)
            .map_err(|err| RemoteError::other(format!("인스턴스 직렬화 실패: {err}")))?;
        info!(project, zone, instance = %instance.name, %body, "[DummyCompute] 인스턴스 생성");
        Ok(())
    }

    async fn get_serial_port_output(
        &self,
        _project: &str,
        _zone: &str,
        _name: &str,
        _port: i64,
        start: i64,
    ) -> Result<SerialPortOutput, RemoteError> {
        Ok(SerialPortOutput {
            contents: String::new(),
            next: start,
        })
    }

    async fn instance_stopped(
        &self,
        _project: &str,
        _zone: &str,
        _name: &str,
    ) -> Result<bool, RemoteError> {
        Ok(false)
    }

    async fn project_exists(&self, _project: &str) -> Result<bool, RemoteError> {
        Ok(true)
    }

    async fn zone_exists(&self, _project: &str, _zone: &str) -> Result<bool, RemoteError> {
        Ok(true)
    }

    async fn machine_type_exists(
        &self,
        _project: &str,
        _zone: &str,
        _machine_type: &str,
    ) -> Result<bool, RemoteError> {
        Ok(true)
    }

    async fn instance_exists(
        &self,
        _project: &str,
        _zone: &str,
        _name: &str,
    ) -> Result<bool, RemoteError> {
        Ok(true)
    }

    async fn disk_exists(
        &self,
        _project: &str,
        _zone: &str,
        _name: &str,
    ) -> Result<bool, RemoteError> {
        Ok(true)
    }

    async fn image_exists(&self, _project: &str, _name: &str) -> Result<bool, RemoteError> {
        Ok(true)
    }

    async fn network_exists(&self, _project: &str, _name: &str) -> Result<bool, RemoteError> {
        Ok(true)
    }
}

/// DummyStorage는 기록 요청을 로그로만 남긴다.
#[derive(Debug, Default, Clone)]
pub struct DummyStorage;

#[async_trait]
impl StorageClient for DummyStorage {
    async fn write_object(
        &self,
        bucket: &str,
        object: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), RemoteError> {
        info!(
            bucket,
            object,
            bytes = data.len(),
            content_type,
            "[DummyStorage] 오브젝트 기록"
        );
        Ok(())
    }
}
