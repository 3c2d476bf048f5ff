use async_trait::async_trait;
use cadence_core::{CadenceError, CadenceResult};
use cadence_orchestrator::{AgentMemory, TaskContext, TaskExecutor};
use tracing::{info, warn};

const MAX_STDOUT: usize = 50_000;
const MAX_STDERR: usize = 10_000;

/// Executor used by the `cadence` binary.
///
/// Tasks with `agent_type = "shell"` run their text through `sh -c`; every
/// other agent type echoes the task back. Both bump a `runs` counter in the
/// agent's memory. Timeouts are enforced by the orchestrator, which drops
/// this future, so child processes are killed on drop.
#[derive(Debug, Default)]
pub struct CliExecutor;

impl CliExecutor {
    /// Create the executor.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskExecutor for CliExecutor {
    async fn execute(&self, ctx: &mut TaskContext) -> CadenceResult<serde_json::Value> {
        let runs = record_run(&mut ctx.memory);
        match ctx.agent_type.as_str() {
            "shell" => {
                let output = run_shell(&ctx.task).await;
                let exit_code = match &output {
                    Ok(value) => value["exit_code"].clone(),
                    Err(_) => serde_json::Value::Null,
                };
                ctx.memory.insert("last_exit_code".into(), exit_code);
                output
            }
            _ => Ok(serde_json::json!({
                "agent_type": ctx.agent_type,
                "echo": ctx.task,
                "runs": runs,
                "dependencies": ctx.dependency_results.keys().collect::<Vec<_>>(),
            })),
        }
    }
}

fn record_run(memory: &mut AgentMemory) -> u64 {
    let runs = memory.get("runs").and_then(serde_json::Value::as_u64).unwrap_or(0) + 1;
    memory.insert("runs".into(), serde_json::json!(runs));
    runs
}

async fn run_shell(command: &str) -> CadenceResult<serde_json::Value> {
    if command.trim().is_empty() {
        return Err(CadenceError::Task("Empty command".to_string()));
    }

    let dangerous = ["rm -rf /", "mkfs", "dd if=", ":(){ :|:& };:"];
    if let Some(pattern) = dangerous.iter().find(|p| command.contains(*p)) {
        warn!(command = %command, "Blocked dangerous command");
        return Err(CadenceError::Task(format!(
            "Command blocked: contains dangerous pattern '{pattern}'"
        )));
    }

    info!(command = %command, "Executing shell task");
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| CadenceError::Task(format!("Failed to execute command: {e}")))?;

    let exit_code = output.status.code().unwrap_or(-1);
    let response = serde_json::json!({
        "exit_code": exit_code,
        "stdout": truncate_output(&String::from_utf8_lossy(&output.stdout), MAX_STDOUT),
        "stderr": truncate_output(&String::from_utf8_lossy(&output.stderr), MAX_STDERR),
    });

    if output.status.success() {
        Ok(response)
    } else {
        Err(CadenceError::Task(response.to_string()))
    }
}

fn truncate_output(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated, {} total bytes]", &s[..end], s.len())
}
