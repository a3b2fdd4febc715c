use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use constellation_core::impls::InMemoryNetwork;
use constellation_core::{
    Activity, ActivityContext, ActivityCx, ActivityError, Event, ExecutorConfig, ExecutorContext,
    Node, NodeConfig, NodeId, Step,
};

/// Compute Fibonacci numbers on a pool of in-memory nodes.
#[derive(Debug, Parser)]
#[command(name = "constellation", version)]
struct Args {
    /// Number of nodes in the pool.
    #[arg(long, default_value_t = 3)]
    nodes: usize,

    /// Executors per node (ignored with --config).
    #[arg(long, default_value_t = 2)]
    executors: usize,

    /// Which Fibonacci number to compute.
    #[arg(short, long, default_value_t = 20)]
    n: u64,

    /// Pool tag (ignored with --config).
    #[arg(long, default_value = "fib")]
    pool: String,

    /// Node configuration as JSON, shared by every node.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Give up waiting for the result after this many seconds.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

/// fib(n) = fib(n-1) + fib(n-2), one activity per call.
#[derive(Debug, Serialize, Deserialize)]
struct Fib {
    context: ActivityContext,
    n: u64,
    pending: u32,
    sum: u64,
}

impl Fib {
    fn new(n: u64) -> Result<Self, ActivityError> {
        let rank = i64::try_from(n)
            .map_err(|_| ActivityError::new(format!("fib({n}) is out of range")))?;
        let context =
            ActivityContext::new("fib", rank).map_err(|e| ActivityError::new(e.to_string()))?;
        Ok(Self {
            context,
            n,
            pending: 0,
            sum: 0,
        })
    }

    fn add(&mut self, value: u64) -> Result<(), ActivityError> {
        self.sum = self
            .sum
            .checked_add(value)
            .ok_or_else(|| ActivityError::new(format!("fib({}) overflows u64", self.n)))?;
        Ok(())
    }
}

impl Activity for Fib {
    const TYPE: &'static str = "cli.fib.v1";

    fn context(&self) -> ActivityContext {
        self.context.clone()
    }

    fn initialize(&mut self, cx: &ActivityCx<'_>) -> Result<Step, ActivityError> {
        if self.n < 2 {
            cx.send_to_parent(&self.n)?;
            return Ok(Step::Finish);
        }
        cx.submit(Fib::new(self.n - 1)?)?;
        cx.submit(Fib::new(self.n - 2)?)?;
        self.pending = 2;
        Ok(Step::Suspend)
    }

    fn process(&mut self, cx: &ActivityCx<'_>, event: Event) -> Result<Step, ActivityError> {
        if let Some(e) = event.error {
            return Err(ActivityError::new(e));
        }
        self.add(serde_json::from_value::<u64>(event.data)?)?;
        self.pending -= 1;
        if self.pending > 0 {
            return Ok(Step::Suspend);
        }
        cx.send_to_parent(&self.sum)?;
        Ok(Step::Finish)
    }
}

fn node_config(args: &Args) -> Result<NodeConfig, Box<dyn std::error::Error>> {
    if let Some(path) = &args.config {
        return Ok(NodeConfig::from_path(path)?);
    }
    let mut executors = Vec::with_capacity(args.executors);
    for _ in 0..args.executors {
        executors.push(ExecutorConfig::new(ExecutorContext::or(["fib", "collector"])?));
    }
    Ok(NodeConfig::new(args.pool.clone(), executors))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = node_config(&args)?;
    let network = InMemoryNetwork::new();

    // (A) ノードを起動してプールに参加させる（最初のノードがマスター）
    let mut nodes: Vec<Arc<Node>> = Vec::with_capacity(args.nodes.max(1));
    for i in 0..args.nodes.max(1) {
        let transport = network.connect(NodeId::new(format!("node-{i}")));
        let node = Node::builder(transport, config.clone())
            .register::<Fib>()?
            .expect_activities(&[Fib::TYPE])
            .build()?;
        node.activate().await?;
        if !node.wait_for_pool(Duration::from_secs(5)).await {
            error!(node = %node.identifier(), "pool membership not received in time");
        }
        nodes.push(Arc::new(node));
    }

    // (B) マスターに collector と fib(n) を投入
    let master = Arc::clone(&nodes[0]);
    let (collector, handle) = master.submit_collector(ActivityContext::new("collector", 0)?)?;
    master.submit_child(&collector, Fib::new(args.n)?)?;

    // (C) 結果を待つ
    match handle
        .wait_timeout(Duration::from_secs(args.timeout_secs))
        .await
    {
        Some(event) if !event.is_error() => {
            let value: u64 = event.decode()?;
            println!("fib({}) = {}", args.n, value);
        }
        Some(event) => error!(error = ?event.error, "computation failed"),
        None => error!(timeout_secs = args.timeout_secs, "no result in time"),
    }

    for node in &nodes {
        let stats = node.stats();
        info!(
            node = %node.identifier(),
            finished = stats.finished,
            stolen_local = stats.stolen_local,
            stolen_remote = stats.stolen_remote,
            served_remote = stats.served_remote,
            "node stats"
        );
    }

    // (D) プールを止めて後片付け
    master.terminate_pool().await?;
    for node in nodes.iter().rev() {
        node.done().await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fib_rejects_n_beyond_the_rank_range() {
        assert!(Fib::new(u64::MAX).is_err());
        assert!(Fib::new(93).is_ok());
    }

    #[test]
    fn fib_sum_overflow_is_an_error() {
        let mut fib = Fib::new(94).unwrap();
        fib.add(u64::MAX - 1).unwrap();
        let error = fib.add(2).unwrap_err();
        assert_eq!(error.to_string(), "fib(94) overflows u64");
    }
}
