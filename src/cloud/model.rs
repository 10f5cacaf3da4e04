use serde::{Deserialize, Serialize};

/// 원격 컨트롤 플레인에 전달되는 VM 인스턴스 명세이다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// 실제 인스턴스 이름.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// 인스턴스 설명.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// 머신 타입 URL.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub machine_type: String,
    /// 연결할 디스크 목록.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<AttachedDisk>,
    /// 네트워크 인터페이스 목록.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_interfaces: Vec<NetworkInterface>,
    /// 서비스 계정 목록.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_accounts: Vec<ServiceAccount>,
    /// 메타데이터 항목.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// 인스턴스에 연결되는 디스크이다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDisk {
    /// 부팅 디스크 여부.
    #[serde(default)]
    pub boot: bool,
    /// 연결 모드(`READ_WRITE`, `READ_ONLY`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,
    /// 기존 디스크의 논리 이름 또는 URL.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    /// 인스턴스 삭제 시 디스크 자동 삭제 여부.
    #[serde(default)]
    pub auto_delete: bool,
    /// 인스턴스와 함께 새 디스크를 만들 때의 초기화 파라미터.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialize_params: Option<InitializeParams>,
}

/// 디스크 초기화 파라미터이다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub disk_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub disk_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<i64>,
}

/// 네트워크 인터페이스 설정이다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// 네트워크 URL.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network: String,
    /// 외부 접근 설정. `None`이면 기본값이 적용되고 빈 목록은 외부 IP 없음을 의미한다.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_configs: Option<Vec<AccessConfig>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfig {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

/// 인스턴스에 부여되는 서비스 계정과 OAuth 스코프이다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    pub email: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataItem {
    pub key: String,
    pub value: String,
}

impl Metadata {
    /// 키에 해당하는 값을 조회한다.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.key == key)
            .map(|item| item.value.as_str())
    }
}

/// 시리얼 콘솔 출력 조회 결과이다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SerialPortOutput {
    /// 요청한 오프셋 이후의 출력 내용.
    pub contents: String,
    /// 다음 조회에 사용할 오프셋.
    pub next: i64,
}
