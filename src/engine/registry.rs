use super::error::ProvisionError;
use super::steps::StepRef;
use super::steps::utils::{
    DISK_URL_RGX, IMAGE_URL_RGX, INSTANCE_URL_RGX, NETWORK_URL_RGX, named_subexp,
};
use crate::cloud::SharedCompute;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// 레지스트리가 관리하는 리소스 종류이다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Instance,
    Disk,
    Image,
    Network,
}

impl ResourceKind {
    pub fn type_name(self) -> &'static str {
        match self {
            ResourceKind::Instance => "instance",
            ResourceKind::Disk => "disk",
            ResourceKind::Image => "image",
            ResourceKind::Network => "network",
        }
    }

    fn url_regex(self) -> &'static Regex {
        match self {
            ResourceKind::Instance => &INSTANCE_URL_RGX,
            ResourceKind::Disk => &DISK_URL_RGX,
            ResourceKind::Image => &IMAGE_URL_RGX,
            ResourceKind::Network => &NETWORK_URL_RGX,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// 논리 이름으로 참조되는 원격 리소스 한 건이다.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    /// 워크플로 사용자가 쓰는 논리 이름. 외부 리소스는 URL 자체이다.
    pub name: String,
    /// 원격에 실제로 부여된 이름.
    pub real_name: String,
    /// 완전한 리소스 경로(`projects/.../zones/.../disks/...`).
    pub link: String,
    /// 워크플로 종료 후 정리하지 않을지 여부.
    pub no_cleanup: bool,
    /// 생성을 등록한 Step ID. 외부 리소스는 `None`이다.
    pub creator: Option<String>,
    /// 사용을 등록한 Step ID 목록.
    pub users: Vec<String>,
    /// 원격 생성 호출이 성공했는지 여부.
    pub created: bool,
    /// 삭제가 등록되었는지 여부.
    pub deleted: bool,
}

impl Resource {
    /// 생성 예약용 리소스를 만든다. 논리 이름과 생성자는 등록 시 채워진다.
    pub fn new(real_name: impl Into<String>, link: impl Into<String>, no_cleanup: bool) -> Self {
        Self {
            name: String::new(),
            real_name: real_name.into(),
            link: link.into(),
            no_cleanup,
            creator: None,
            users: Vec::new(),
            created: false,
            deleted: false,
        }
    }
}

/// 리소스 종류 하나에 대한 논리 이름 → 리소스 맵이다.
///
/// 모든 변경은 맵 쓰기 잠금 아래에서 확인과 삽입을 한 번에 수행한다.
/// `get`은 잠깐의 읽기 잠금만 잡는 시점 조회이다.
pub struct ResourceRegistry {
    kind: ResourceKind,
    compute: SharedCompute,
    entries: RwLock<HashMap<String, Resource>>,
}

impl ResourceRegistry {
    pub fn new(kind: ResourceKind, compute: SharedCompute) -> Self {
        Self {
            kind,
            compute,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// `owner` Step이 `name`을 생성할 것임을 예약한다.
    ///
    /// 이미 등록된 이름이면 `allow_existing`이 참일 때만 덮어쓴다.
    pub fn register_creation(
        &self,
        name: &str,
        mut resource: Resource,
        owner: &StepRef,
        allow_existing: bool,
    ) -> Result<(), ProvisionError> {
        let mut entries = self.entries.write().expect("ResourceRegistry lock poisoned");
        if let Some(existing) = entries.get(name) {
            if !allow_existing {
                return Err(ProvisionError::Conflict {
                    kind: self.kind.type_name(),
                    name: name.to_string(),
                    owner: existing.creator.clone().unwrap_or_default(),
                });
            }
        }
        resource.name = name.to_string();
        resource.creator = Some(owner.id().to_string());
        entries.insert(name.to_string(), resource);
        Ok(())
    }

    /// `user` Step의 `name` 사용을 등록하고 해석된 리소스를 반환한다.
    ///
    /// 완전한 URL이면 원격 존재 여부를 확인한 외부 리소스를 돌려주며 맵에는 넣지 않는다.
    pub async fn register_usage(
        &self,
        name: &str,
        user: &StepRef,
    ) -> Result<Resource, ProvisionError> {
        if self.kind.url_regex().is_match(name) {
            return self.resolve_url(name).await;
        }
        let mut entries = self.entries.write().expect("ResourceRegistry lock poisoned");
        let Some(resource) = entries.get_mut(name) else {
            return Err(ProvisionError::NotFound {
                kind: self.kind.type_name(),
                name: name.to_string(),
            });
        };
        if resource.deleted {
            return Err(self.unresolved(name, "이미 삭제되었습니다.".to_string()));
        }
        if let Some(creator) = &resource.creator {
            if !user.depends_on(creator) {
                return Err(self.unresolved(
                    name,
                    format!("생성 Step {creator:?}에 (간접적으로라도) 의존해야 합니다."),
                ));
            }
        }
        if !resource.users.iter().any(|u| u == user.id()) {
            resource.users.push(user.id().to_string());
        }
        Ok(resource.clone())
    }

    /// `owner` Step의 `name` 삭제를 등록한다.
    pub fn register_deletion(&self, name: &str, owner: &StepRef) -> Result<Resource, ProvisionError> {
        let mut entries = self.entries.write().expect("ResourceRegistry lock poisoned");
        let Some(resource) = entries.get_mut(name) else {
            return Err(ProvisionError::NotFound {
                kind: self.kind.type_name(),
                name: name.to_string(),
            });
        };
        if resource.deleted {
            return Err(self.unresolved(name, "이미 삭제되었습니다.".to_string()));
        }
        if let Some(creator) = &resource.creator {
            if creator != owner.id() && !owner.depends_on(creator) {
                return Err(self.unresolved(
                    name,
                    format!("삭제하려면 생성 Step {creator:?}에 의존해야 합니다."),
                ));
            }
        }
        resource.deleted = true;
        Ok(resource.clone())
    }

    /// 원격 생성이 끝난 리소스를 표시한다. 등록되지 않은 이름이면 `false`이다.
    pub fn mark_created(&self, name: &str) -> bool {
        let mut entries = self.entries.write().expect("ResourceRegistry lock poisoned");
        match entries.get_mut(name) {
            Some(resource) => {
                resource.created = true;
                true
            }
            None => false,
        }
    }

    /// 논리 이름으로 리소스를 조회한다. 없거나 삭제된 경우 `None`이다.
    pub fn get(&self, name: &str) -> Option<Resource> {
        let entries = self.entries.read().expect("ResourceRegistry lock poisoned");
        entries.get(name).filter(|r| !r.deleted).cloned()
    }

    /// 실제로 생성되었고 정리 대상인 리소스를 이름순으로 반환한다.
    pub fn cleanup_candidates(&self) -> Vec<Resource> {
        let entries = self.entries.read().expect("ResourceRegistry lock poisoned");
        let mut candidates: Vec<Resource> = entries
            .values()
            .filter(|r| r.created && !r.deleted && !r.no_cleanup)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        candidates
    }

    async fn resolve_url(&self, url: &str) -> Result<Resource, ProvisionError> {
        let parts = named_subexp(self.kind.url_regex(), url);
        let project = parts.get("project").map(String::as_str).unwrap_or_default();
        if project.is_empty() {
            return Err(self.unresolved(url, "프로젝트가 지정되지 않은 URL입니다.".to_string()));
        }
        let zone = parts.get("zone").map(String::as_str).unwrap_or_default();
        let lookup = match self.kind {
            ResourceKind::Instance => {
                self.compute
                    .instance_exists(project, zone, &parts["instance"])
                    .await
            }
            ResourceKind::Disk => self.compute.disk_exists(project, zone, &parts["disk"]).await,
            ResourceKind::Image => {
                let image = if parts["family"].is_empty() {
                    parts["image"].clone()
                } else {
                    format!("family/{}", parts["family"])
                };
                self.compute.image_exists(project, &image).await
            }
            ResourceKind::Network => self.compute.network_exists(project, &parts["network"]).await,
        };
        match lookup {
            Ok(true) => {
                let real_name = url.rsplit('/').next().unwrap_or(url).to_string();
                Ok(Resource {
                    name: url.to_string(),
                    real_name,
                    link: url.to_string(),
                    no_cleanup: true,
                    creator: None,
                    users: Vec::new(),
                    created: true,
                    deleted: false,
                })
            }
            Ok(false) => Err(ProvisionError::NotFound {
                kind: self.kind.type_name(),
                name: url.to_string(),
            }),
            Err(err) => Err(ProvisionError::Lookup(format!(
                "{} {url:?} 조회 실패: {err}",
                self.kind
            ))),
        }
    }

    fn unresolved(&self, name: &str, reason: String) -> ProvisionError {
        ProvisionError::Unresolved {
            kind: self.kind.type_name(),
            name: name.to_string(),
            reason,
        }
    }
}

/// 워크플로 하나가 공유하는 종류별 레지스트리 묶음이다.
pub struct Registries {
    instances: ResourceRegistry,
    disks: ResourceRegistry,
    images: ResourceRegistry,
    networks: ResourceRegistry,
}

impl Registries {
    pub fn new(compute: SharedCompute) -> Self {
        Self {
            instances: ResourceRegistry::new(ResourceKind::Instance, compute.clone()),
            disks: ResourceRegistry::new(ResourceKind::Disk, compute.clone()),
            images: ResourceRegistry::new(ResourceKind::Image, compute.clone()),
            networks: ResourceRegistry::new(ResourceKind::Network, compute),
        }
    }

    pub fn instances(&self) -> &ResourceRegistry {
        &self.instances
    }

    pub fn disks(&self) -> &ResourceRegistry {
        &self.disks
    }

    pub fn images(&self) -> &ResourceRegistry {
        &self.images
    }

    pub fn networks(&self) -> &ResourceRegistry {
        &self.networks
    }

    fn get(&self, kind: ResourceKind) -> &ResourceRegistry {
        match kind {
            ResourceKind::Instance => &self.instances,
            ResourceKind::Disk => &self.disks,
            ResourceKind::Image => &self.images,
            ResourceKind::Network => &self.networks,
        }
    }

    /// 모든 종류의 정리 대상을 인스턴스, 디스크, 이미지, 네트워크 순으로 모은다.
    pub fn cleanup_candidates(&self) -> Vec<(ResourceKind, Resource)> {
        [
            ResourceKind::Instance,
            ResourceKind::Disk,
            ResourceKind::Image,
            ResourceKind::Network,
        ]
        .into_iter()
        .flat_map(|kind| {
            self.get(kind)
                .cleanup_candidates()
                .into_iter()
                .map(move |r| (kind, r))
        })
        .collect()
    }
}
