use super::utils::join_path;
use crate::engine::context::WorkflowContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// 수집하는 시리얼 포트 번호이다.
pub const SERIAL_PORT: i64 = 1;

/// 시리얼 출력을 수집할 인스턴스이다.
#[derive(Debug, Clone)]
pub struct SerialTarget {
    /// 레지스트리에 등록된 논리 이름.
    pub logical_name: String,
    /// 원격 API에서 쓰는 실제 이름.
    pub real_name: String,
    pub project: String,
    pub zone: String,
}

/// 인스턴스의 시리얼 포트 출력을 주기적으로 읽어 로그 경로에 누적 기록한다.
///
/// 매 주기마다 지금까지 받은 전체 출력을 같은 오브젝트에 덮어쓴다.
/// 취소되거나, 인스턴스가 사라지거나 정지했거나, 복구할 수 없는 오류가 나면 끝난다.
pub async fn stream_serial_output(
    wf: Arc<WorkflowContext>,
    target: SerialTarget,
    port: i64,
    interval: Duration,
) {
    let object = join_path(&[
        wf.logs_path(),
        &format!("{}-serial-port{port}.log", target.real_name),
    ]);
    info!(
        instance = %target.real_name,
        port,
        "시리얼 포트 출력을 gs://{}/{} 에 기록합니다.",
        wf.bucket(),
        object
    );

    let compute = wf.compute();
    let storage = wf.storage();
    let cancel = wf.cancel_token().clone();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut start = 0;
    let mut buf = String::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let output = match compute
            .get_serial_port_output(&target.project, &target.zone, &target.real_name, port, start)
            .await
        {
            Ok(output) => output,
            Err(err) => {
                if wf.registries().instances().get(&target.logical_name).is_none() {
                    debug!(instance = %target.real_name, "인스턴스가 삭제되어 시리얼 로그 수집을 끝냅니다.");
                    return;
                }
                if let Ok(true) = compute
                    .instance_stopped(&target.project, &target.zone, &target.real_name)
                    .await
                {
                    debug!(instance = %target.real_name, "인스턴스가 정지되어 시리얼 로그 수집을 끝냅니다.");
                    return;
                }
                warn!(
                    instance = %target.real_name,
                    port,
                    "시리얼 포트 출력 조회 실패: {err}"
                );
                return;
            }
        };
        start = output.next;
        buf.push_str(&output.contents);

        if let Err(err) = storage
            .write_object(wf.bucket(), &object, buf.as_bytes(), "text/plain")
            .await
        {
            if err.is_server_error() {
                debug!(instance = %target.real_name, "시리얼 로그 기록 재시도 예정: {err}");
                continue;
            }
            warn!(
                instance = %target.real_name,
                port,
                "시리얼 로그 기록 실패: {err}"
            );
            return;
        }
    }
}
