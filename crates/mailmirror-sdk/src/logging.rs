//! 日志初始化

/// 安装全局 fmt 日志订阅器
///
/// 重复调用时返回 false（已有全局订阅器），不会 panic。
pub fn init_logging(debug_mode: bool) -> bool {
    let level = if debug_mode {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init()
        .is_ok()
}
