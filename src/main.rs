mod cloud;
mod definition;
mod engine;

use anyhow::Context;
use cloud::{DummyCompute, DummyStorage};
use definition::load_workflow_from_file;
use engine::{WorkflowContext, run_workflow};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// 워크플로 YAML을 읽어 드라이런 클라이언트로 실행하는 진입점입니다.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path: PathBuf = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("사용법: rust-daisy <workflow.yaml>")?;
    let definition = load_workflow_from_file(&path)?;
    let settings = definition.to_settings();
    let steps = definition.into_steps();

    let runtime = Runtime::new().context("Tokio 런타임 생성 실패")?;
    runtime.block_on(async move {
        let wf = Arc::new(WorkflowContext::new(
            settings,
            Arc::new(DummyCompute),
            Arc::new(DummyStorage),
        )?);
        info!(
            workflow = wf.name(),
            id = wf.id(),
            sources = ?wf.source_paths(),
            "스크래치 경로 {}",
            wf.sources_url()
        );

        let canceller = wf.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl+C 수신, 워크플로를 취소합니다.");
                    canceller.cancel();
                }
                Err(err) => warn!("Ctrl+C 핸들러 등록 실패: {err}"),
            }
        });

        run_workflow(wf, steps).await
    })
}
