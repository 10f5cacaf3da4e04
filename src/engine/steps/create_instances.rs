use super::serial_log::{SERIAL_PORT, SerialTarget, stream_serial_output};
use super::utils::{
    DISK_TYPE_URL_RGX, DISK_URL_RGX, IMAGE_URL_RGX, MACHINE_TYPE_URL_RGX, NETWORK_URL_RGX,
    check_disk_mode, check_name, extend_partial_url, named_subexp, str_or,
};
use super::{StepAction, StepContext};
use crate::cloud::{
    AccessConfig, AttachedDisk, ComputeClient, InitializeParams, Instance, MetadataItem,
    NetworkInterface, ServiceAccount,
};
use crate::engine::context::WorkflowContext;
use crate::engine::error::{ErrorList, ProvisionError};
use crate::engine::registry::Resource;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_DISK_MODE: &str = "READ_WRITE";
const DEFAULT_DISK_TYPE: &str = "pd-standard";
const DEFAULT_MACHINE_TYPE: &str = "n1-standard-1";
const DEFAULT_NETWORK: &str = "default";
const DEFAULT_ACCESS_CONFIG_TYPE: &str = "ONE_TO_ONE_NAT";
const DEFAULT_SERVICE_ACCOUNT: &str = "default";
pub(crate) const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_only";

/// 인스턴스 하나를 생성하는 설명자이다.
///
/// 원격 API에 그대로 전달되는 [`Instance`] 명세와 워크플로 전용 필드로 구성된다.
/// 출력 포맷은 [`Serialize`] 구현이 직접 정한다.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstance {
    /// 원격 API 인스턴스 명세.
    #[serde(flatten)]
    pub instance: Instance,
    /// 인스턴스에 추가할 메타데이터.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// OAuth2 스코프. 비어 있으면 스토리지 읽기 전용 스코프가 추가된다.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// 시작 스크립트로 쓸 소스 파일의 논리 경로.
    #[serde(default)]
    pub startup_script: String,
    /// 워크플로 기본 프로젝트를 덮어쓴다.
    #[serde(default)]
    pub project: String,
    /// 워크플로 기본 존을 덮어쓴다.
    #[serde(default)]
    pub zone: String,
    /// 워크플로 종료 후 정리하지 않는다.
    #[serde(default)]
    pub no_cleanup: bool,
    /// 지정하면 자동 생성 대신 이 이름을 실제 이름으로 쓴다.
    #[serde(default)]
    pub real_name: String,
    #[serde(skip)]
    logical_name: String,
}

impl Serialize for CreateInstance {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let i = &self.instance;
        let mut map = serializer.serialize_map(None)?;
        if !i.name.is_empty() {
            map.serialize_entry("name", &i.name)?;
        }
        if !i.description.is_empty() {
            map.serialize_entry("description", &i.description)?;
        }
        if !i.machine_type.is_empty() {
            map.serialize_entry("machineType", &i.machine_type)?;
        }
        if !i.disks.is_empty() {
            map.serialize_entry("disks", &i.disks)?;
        }
        if !i.network_interfaces.is_empty() {
            map.serialize_entry("networkInterfaces", &i.network_interfaces)?;
        }
        if !i.service_accounts.is_empty() {
            map.serialize_entry("serviceAccounts", &i.service_accounts)?;
        }
        if !self.metadata.is_empty() {
            map.serialize_entry("metadata", &self.metadata)?;
        }
        if !self.scopes.is_empty() {
            map.serialize_entry("scopes", &self.scopes)?;
        }
        if !self.startup_script.is_empty() {
            map.serialize_entry("startupScript", &self.startup_script)?;
        }
        if !self.project.is_empty() {
            map.serialize_entry("project", &self.project)?;
        }
        if !self.zone.is_empty() {
            map.serialize_entry("zone", &self.zone)?;
        }
        if self.no_cleanup {
            map.serialize_entry("noCleanup", &self.no_cleanup)?;
        }
        if !self.real_name.is_empty() {
            map.serialize_entry("realName", &self.real_name)?;
        }
        map.end()
    }
}

impl CreateInstance {
    /// 사용자가 부른 논리 이름. populate 이후에만 채워진다.
    pub fn logical_name(&self) -> &str {
        &self.logical_name
    }

    fn populate(&mut self, wf: &WorkflowContext) -> ErrorList {
        let mut errs = ErrorList::new();
        self.logical_name = self.instance.name.clone();
        self.instance.name = if self.real_name.is_empty() {
            wf.gen_name(&self.instance.name)
        } else {
            self.real_name.clone()
        };
        self.project = str_or(&self.project, wf.project());
        self.zone = str_or(&self.zone, wf.zone());
        self.instance.description = str_or(
            &self.instance.description,
            &format!(
                "Instance created by Daisy in workflow {:?} on behalf of {}.",
                wf.name(),
                wf.username()
            ),
        );

        self.populate_disks();
        self.populate_machine_type();
        if let Err(err) = self.populate_metadata(wf) {
            errs.push(err);
        }
        self.populate_networks();
        self.populate_scopes();
        errs
    }

    /// 첫 디스크를 부팅 디스크로 지정하고, 이름 없는 새 디스크에
    /// `<인스턴스>`, `<인스턴스>-2`, `<인스턴스>-3` … 순서로 이름을 붙인다.
    fn populate_disks(&mut self) {
        let mut autoname_idx = 1;
        for (i, disk) in self.instance.disks.iter_mut().enumerate() {
            disk.boot = i == 0;
            disk.mode = str_or(&disk.mode, DEFAULT_DISK_MODE);
            if DISK_URL_RGX.is_match(&disk.source) {
                disk.source = extend_partial_url(&disk.source, &self.project);
            }
            let Some(params) = disk.initialize_params.as_mut() else {
                continue;
            };
            if params.disk_name.is_empty() {
                params.disk_name = if autoname_idx > 1 {
                    format!("{}-{autoname_idx}", self.instance.name)
                } else {
                    self.instance.name.clone()
                };
                autoname_idx += 1;
            }
            if IMAGE_URL_RGX.is_match(&params.source_image) {
                params.source_image = extend_partial_url(&params.source_image, &self.project);
            }
            params.disk_type = str_or(&params.disk_type, DEFAULT_DISK_TYPE);
            params.disk_type = if DISK_TYPE_URL_RGX.is_match(&params.disk_type) {
                extend_partial_url(&params.disk_type, &self.project)
            } else {
                format!(
                    "projects/{}/zones/{}/diskTypes/{}",
                    self.project, self.zone, params.disk_type
                )
            };
        }
    }

    fn populate_machine_type(&mut self) {
        let machine_type = str_or(&self.instance.machine_type, DEFAULT_MACHINE_TYPE);
        self.instance.machine_type = if MACHINE_TYPE_URL_RGX.is_match(&machine_type) {
            extend_partial_url(&machine_type, &self.project)
        } else {
            format!(
                "projects/{}/zones/{}/machineTypes/{machine_type}",
                self.project, self.zone
            )
        };
    }

    /// 스크래치 경로 메타데이터를 넣고 시작 스크립트를 업로드 위치 URL로 바꾼다.
    fn populate_metadata(&mut self, wf: &WorkflowContext) -> Result<(), ProvisionError> {
        self.metadata
            .insert("daisy-sources-path".into(), wf.sources_url());
        self.metadata.insert("daisy-logs-path".into(), wf.logs_url());
        self.metadata.insert("daisy-outs-path".into(), wf.outs_url());
        let mut result = Ok(());
        if !self.startup_script.is_empty() {
            if wf.source_exists(&self.startup_script) {
                self.startup_script = wf.source_url(&self.startup_script);
                self.metadata
                    .insert("startup-script-url".into(), self.startup_script.clone());
                self.metadata
                    .insert("windows-startup-script-url".into(), self.startup_script.clone());
            } else {
                result = Err(ProvisionError::Validation(format!(
                    "StartupScript 값이 잘못되었습니다. 선언되지 않은 소스입니다: {}",
                    self.startup_script
                )));
            }
        }
        let items = &mut self
            .instance
            .metadata
            .get_or_insert_with(Default::default)
            .items;
        for (key, value) in &self.metadata {
            match items.iter_mut().find(|item| &item.key == key) {
                Some(item) => item.value = value.clone(),
                None => items.push(MetadataItem {
                    key: key.clone(),
                    value: value.clone(),
                }),
            }
        }
        result
    }

    fn populate_networks(&mut self) {
        if self.instance.network_interfaces.is_empty() {
            self.instance
                .network_interfaces
                .push(NetworkInterface::default());
        }
        for nic in &mut self.instance.network_interfaces {
            if nic.access_configs.is_none() {
                nic.access_configs = Some(vec![AccessConfig {
                    kind: DEFAULT_ACCESS_CONFIG_TYPE.to_string(),
                }]);
            }
            let network = str_or(&nic.network, DEFAULT_NETWORK);
            nic.network = if NETWORK_URL_RGX.is_match(&network) {
                extend_partial_url(&network, &self.project)
            } else {
                format!("projects/{}/global/networks/{network}", self.project)
            };
        }
    }

    fn populate_scopes(&mut self) {
        if self.scopes.is_empty() {
            self.scopes.push(DEFAULT_SCOPE.to_string());
        }
        if self.instance.service_accounts.is_empty() {
            self.instance.service_accounts = vec![ServiceAccount {
                email: DEFAULT_SERVICE_ACCOUNT.to_string(),
                scopes: self.scopes.clone(),
            }];
        }
    }

    async fn validate(&self, ctx: &StepContext) -> ErrorList {
        let mut errs = ErrorList::new();
        let wf = &ctx.workflow;
        let compute = wf.compute();
        let name = &self.instance.name;
        if !check_name(name) {
            errs.push(ProvisionError::Validation(format!(
                "인스턴스 {name:?}을(를) 만들 수 없습니다: 잘못된 이름입니다."
            )));
        }

        match compute.project_exists(&self.project).await {
            Ok(true) => {}
            Ok(false) => {
                errs.push(ProvisionError::Lookup(format!(
                    "인스턴스를 만들 수 없습니다: 프로젝트가 존재하지 않습니다: {:?}",
                    self.project
                )));
                return errs;
            }
            Err(err) => {
                errs.push(ProvisionError::Lookup(format!(
                    "인스턴스를 만들 수 없습니다: 프로젝트 {:?} 조회 실패: {err}",
                    self.project
                )));
                return errs;
            }
        }
        match compute.zone_exists(&self.project, &self.zone).await {
            Ok(true) => {}
            Ok(false) => {
                errs.push(ProvisionError::Lookup(format!(
                    "인스턴스를 만들 수 없습니다: 존이 존재하지 않습니다: {:?}",
                    self.zone
                )));
                return errs;
            }
            Err(err) => {
                errs.push(ProvisionError::Lookup(format!(
                    "인스턴스를 만들 수 없습니다: 존 {:?} 조회 실패: {err}",
                    self.zone
                )));
                return errs;
            }
        }

        errs.extend(self.validate_disks(ctx).await);
        errs.extend(self.validate_machine_type(compute.as_ref()).await);
        errs.extend(self.validate_networks(ctx).await);

        let link = format!(
            "projects/{}/zones/{}/instances/{name}",
            self.project, self.zone
        );
        let resource = Resource::new(name.clone(), link, self.no_cleanup);
        if let Err(err) = wf.registries().instances().register_creation(
            &self.logical_name,
            resource,
            &ctx.step,
            false,
        ) {
            errs.push(err);
        }
        errs
    }

    async fn validate_disks(&self, ctx: &StepContext) -> ErrorList {
        let mut errs = ErrorList::new();
        if self.instance.disks.is_empty() {
            errs.push(ProvisionError::Validation(format!(
                "인스턴스 {:?}을(를) 만들 수 없습니다: 디스크가 없습니다.",
                self.instance.name
            )));
        }
        for disk in &self.instance.disks {
            if !check_disk_mode(&disk.mode) {
                errs.push(ProvisionError::Validation(format!(
                    "인스턴스를 만들 수 없습니다: 잘못된 디스크 모드: {:?}",
                    disk.mode
                )));
            }
            if !disk.source.is_empty() && disk.initialize_params.is_some() {
                errs.push(ProvisionError::Validation(
                    "인스턴스를 만들 수 없습니다: disk.source와 disk.initializeParams는 함께 쓸 수 없습니다."
                        .to_string(),
                ));
            }
            match &disk.initialize_params {
                Some(params) => {
                    errs.extend(self.validate_initialize_params(disk, params, ctx).await)
                }
                None => errs.extend(self.validate_disk_source(disk, ctx).await),
            }
        }
        errs
    }

    async fn validate_disk_source(&self, disk: &AttachedDisk, ctx: &StepContext) -> ErrorList {
        let mut errs = ErrorList::new();
        let resolved = match ctx
            .workflow
            .registries()
            .disks()
            .register_usage(&disk.source, &ctx.step)
            .await
        {
            Ok(resource) => resource,
            Err(err) => {
                errs.push(err);
                return errs;
            }
        };
        let parts = named_subexp(&DISK_URL_RGX, &resolved.link);
        if parts["project"] != self.project {
            errs.push(ProvisionError::Reference(format!(
                "프로젝트 {:?}의 인스턴스에 프로젝트 {:?}의 디스크를 연결할 수 없습니다: {:?}",
                self.project, parts["project"], disk.source
            )));
        }
        if parts["zone"] != self.zone {
            errs.push(ProvisionError::Reference(format!(
                "존 {:?}의 인스턴스에 존 {:?}의 디스크를 연결할 수 없습니다: {:?}",
                self.zone, parts["zone"], disk.source
            )));
        }
        errs
    }

    async fn validate_initialize_params(
        &self,
        disk: &AttachedDisk,
        params: &InitializeParams,
        ctx: &StepContext,
    ) -> ErrorList {
        let mut errs = ErrorList::new();
        let registries = ctx.workflow.registries();
        if !check_name(&params.disk_name) {
            errs.push(ProvisionError::Validation(format!(
                "인스턴스를 만들 수 없습니다: 잘못된 InitializeParams.DiskName: {:?}",
                params.disk_name
            )));
        }
        if !params.source_image.is_empty() {
            if let Err(err) = registries
                .images()
                .register_usage(&params.source_image, &ctx.step)
                .await
            {
                errs.push(err);
            }
        }
        let parts = named_subexp(&DISK_TYPE_URL_RGX, &params.disk_type);
        if parts["project"] != self.project {
            errs.push(ProvisionError::Reference(format!(
                "프로젝트 {:?}의 인스턴스에 프로젝트 {:?}의 디스크 타입을 쓸 수 없습니다.",
                self.project, parts["project"]
            )));
        }
        if parts["zone"] != self.zone {
            errs.push(ProvisionError::Reference(format!(
                "존 {:?}의 인스턴스에 존 {:?}의 디스크 타입을 쓸 수 없습니다.",
                self.zone, parts["zone"]
            )));
        }

        let link = format!(
            "projects/{}/zones/{}/disks/{}",
            self.project, self.zone, params.disk_name
        );
        // 자동 삭제되는 디스크는 따로 정리하지 않는다.
        let resource = Resource::new(params.disk_name.clone(), link, disk.auto_delete);
        if let Err(err) =
            registries
                .disks()
                .register_creation(&params.disk_name, resource, &ctx.step, false)
        {
            errs.push(err);
        }
        errs
    }

    async fn validate_machine_type(&self, compute: &dyn ComputeClient) -> ErrorList {
        let mut errs = ErrorList::new();
        let machine_type = &self.instance.machine_type;
        if !MACHINE_TYPE_URL_RGX.is_match(machine_type) {
            errs.push(ProvisionError::Validation(format!(
                "인스턴스를 만들 수 없습니다: 잘못된 MachineType: {machine_type:?}"
            )));
            return errs;
        }
        let parts = named_subexp(&MACHINE_TYPE_URL_RGX, machine_type);
        if parts["project"] != self.project {
            errs.push(ProvisionError::Reference(format!(
                "프로젝트 {:?}의 인스턴스에 프로젝트 {:?}의 MachineType을 쓸 수 없습니다: {machine_type:?}",
                self.project, parts["project"]
            )));
        }
        if parts["zone"] != self.zone {
            errs.push(ProvisionError::Reference(format!(
                "존 {:?}의 인스턴스에 존 {:?}의 MachineType을 쓸 수 없습니다: {machine_type:?}",
                self.zone, parts["zone"]
            )));
        }
        match compute
            .machine_type_exists(&parts["project"], &parts["zone"], &parts["machinetype"])
            .await
        {
            Ok(true) => {}
            Ok(false) => errs.push(ProvisionError::Lookup(format!(
                "인스턴스를 만들 수 없습니다: MachineType이 존재하지 않습니다: {:?}",
                parts["machinetype"]
            ))),
            Err(err) => errs.push(ProvisionError::Lookup(format!(
                "인스턴스를 만들 수 없습니다: MachineType {:?} 조회 실패: {err}",
                parts["machinetype"]
            ))),
        }
        errs
    }

    async fn validate_networks(&self, ctx: &StepContext) -> ErrorList {
        let mut errs = ErrorList::new();
        for nic in &self.instance.network_interfaces {
            let resolved = match ctx
                .workflow
                .registries()
                .networks()
                .register_usage(&nic.network, &ctx.step)
                .await
            {
                Ok(resource) => resource,
                Err(err) => {
                    errs.push(err);
                    return errs;
                }
            };
            let parts = named_subexp(&NETWORK_URL_RGX, &resolved.link);
            if parts["project"] != self.project {
                errs.push(ProvisionError::Reference(format!(
                    "프로젝트 {:?}의 인스턴스에 프로젝트 {:?}의 네트워크를 쓸 수 없습니다: {:?}",
                    self.project, parts["project"], nic.network
                )));
            }
        }
        errs
    }
}

/// 서로 독립적인 인스턴스 설명자 목록을 한 번에 생성하는 Step이다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateInstances(pub Vec<CreateInstance>);

#[async_trait]
impl StepAction for CreateInstances {
    async fn populate(&mut self, ctx: &StepContext) -> Result<(), ErrorList> {
        let mut errs = ErrorList::new();
        for ci in &mut self.0 {
            errs.extend(ci.populate(&ctx.workflow));
        }
        errs.into_result()
    }

    async fn validate(&self, ctx: &StepContext) -> Result<(), ErrorList> {
        let mut errs = ErrorList::new();
        for ci in &self.0 {
            errs.extend(ci.validate(ctx).await);
        }
        errs.into_result()
    }

    /// 설명자마다 태스크를 띄워 동시에 생성한다.
    ///
    /// 첫 실패를 반환한다. 취소되면 진행 중인 생성 호출이 모두 끝날 때까지 기다린 뒤
    /// 오류 없이 반환한다.
    async fn run(&self, ctx: &StepContext) -> Result<(), ProvisionError> {
        let wf = ctx.workflow.clone();
        let mut running = FuturesUnordered::new();
        for ci in &self.0 {
            let task = create_instance(ci.clone(), wf.clone());
            running.push(wf.tracker().spawn(task));
        }
        let cancel = wf.cancel_token().clone();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(step = ctx.step.id(), "취소 신호 수신, 진행 중인 인스턴스 생성 완료를 기다립니다.");
                    while running.next().await.is_some() {}
                    return Ok(());
                }
                joined = running.next() => match joined {
                    None => return Ok(()),
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(err))) => return Err(err),
                    Some(Err(join_err)) => {
                        return Err(ProvisionError::RemoteOperation(format!(
                            "인스턴스 생성 태스크가 비정상 종료되었습니다: {join_err}"
                        )));
                    }
                },
            }
        }
    }
}

/// 디스크 논리 이름을 실제 링크로 바꾼 뒤 인스턴스를 생성하고 시리얼 로그 수집을 시작한다.
async fn create_instance(
    mut ci: CreateInstance,
    wf: Arc<WorkflowContext>,
) -> Result<(), ProvisionError> {
    let registries = wf.registries();
    for disk in &mut ci.instance.disks {
        if let Some(resource) = registries.disks().get(&disk.source) {
            disk.source = resource.link;
        }
    }

    info!(instance = %ci.instance.name, "인스턴스를 생성합니다.");
    wf.compute()
        .create_instance(&ci.project, &ci.zone, &ci.instance)
        .await
        .map_err(|err| {
            ProvisionError::RemoteOperation(format!(
                "인스턴스 {:?} 생성 실패: {err}",
                ci.instance.name
            ))
        })?;

    registries.instances().mark_created(&ci.logical_name);
    for disk in &ci.instance.disks {
        if let Some(params) = &disk.initialize_params {
            registries.disks().mark_created(&params.disk_name);
        }
    }
    debug!(instance = %ci.instance.name, "인스턴스 생성 완료");

    let target = SerialTarget {
        logical_name: ci.logical_name,
        real_name: ci.instance.name,
        project: ci.project,
        zone: ci.zone,
    };
    let interval = wf.serial_log_interval();
    wf.tracker()
        .spawn(stream_serial_output(wf.clone(), target, SERIAL_PORT, interval));
    Ok(())
}
