//! 单写者队列 - 串行化文件写入
//!
//! 核心设计：
//! - 一个专用 tokio 任务按 FIFO 顺序执行写入任务
//! - 同一时刻最多一个写入在执行，后续写入排队等待
//! - 调用方通过 oneshot 拿到自己那次写入的结果

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::{MirrorError, Result};

/// 写入任务
struct WriteCommand {
    job: BoxFuture<'static, Result<()>>,
    respond_to: oneshot::Sender<Result<()>>,
}

/// 写队列句柄（克隆后共享同一个 worker）
#[derive(Clone)]
pub struct WriteQueue {
    name: Arc<str>,
    sender: mpsc::UnboundedSender<WriteCommand>,
    in_flight: Arc<AtomicUsize>,
}

impl std::fmt::Debug for WriteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteQueue")
            .field("name", &self.name)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl WriteQueue {
    /// 启动写队列 worker（需要在 tokio 运行时中调用）
    pub fn spawn(name: &str) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<WriteCommand>();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let name: Arc<str> = Arc::from(name);

        let worker_in_flight = in_flight.clone();
        let worker_name = name.clone();
        tokio::spawn(async move {
            debug!("写队列 worker 启动: {}", worker_name);
            while let Some(command) = receiver.recv().await {
                let result = command.job.await;
                if let Err(e) = &result {
                    error!("❌ [{}] 写入失败: {}", worker_name, e);
                }
                worker_in_flight.fetch_sub(1, Ordering::SeqCst);
                let _ = command.respond_to.send(result);
            }
            debug!("写队列 worker 退出: {}", worker_name);
        });

        Self {
            name,
            sender,
            in_flight,
        }
    }

    /// 排队一次写入，返回等待其完成的 future
    ///
    /// 入队在调用时立即发生（不等 future 被 poll），因此调用顺序即执行顺序。
    pub fn enqueue<F>(&self, job: F) -> impl Future<Output = Result<()>> + Send + 'static
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let submitted = self.submit(Box::pin(job));
        let name = self.name.clone();
        async move {
            let rx = submitted?;
            rx.await
                .map_err(|_| MirrorError::InvalidState(format!("写队列响应失败: {}", name)))?
        }
    }

    fn submit(&self, job: BoxFuture<'static, Result<()>>) -> Result<oneshot::Receiver<Result<()>>> {
        let (tx, rx) = oneshot::channel();
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let command = WriteCommand {
            job,
            respond_to: tx,
        };
        if self.sender.send(command).is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(MirrorError::InvalidState(format!("写队列已停止: {}", self.name)));
        }
        Ok(rx)
    }

    /// 已排队和正在执行的写入数量
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}
