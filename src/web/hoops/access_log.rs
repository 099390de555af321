use std::time::Instant;

use salvo::prelude::*;
use tracing::info;

use crate::common::log::ACCESS_TARGET;

/// `[ProxyPool] 状态码 | 耗时 | 客户端 | 方法  路径`，写到 access.log。
#[handler]
pub async fn access_log(req: &mut Request, depot: &mut Depot, res: &mut Response, ctrl: &mut FlowCtrl) {
    let start = Instant::now();
    ctrl.call_next(req, depot, res).await;
    let status = res.status_code.unwrap_or(StatusCode::OK);
    info!(
        target: ACCESS_TARGET,
        "[ProxyPool] {:3} | {:>13?} | {:>15} | {:<7} {}",
        status.as_u16(),
        start.elapsed(),
        req.remote_addr().to_string(),
        req.method().as_str(),
        req.uri().path()
    );
}
