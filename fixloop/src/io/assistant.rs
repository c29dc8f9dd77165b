//! External coding-assistant invocation.

use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, info, instrument, trace, warn};

use crate::interrupt::Interrupt;
use crate::io::process::{LineSink, run_command_streaming, stdout_sink};

/// Something that can be asked to change the working tree.
pub trait AssistantRunner {
    /// Run the assistant on `prompt` to completion.
    ///
    /// Returns true iff it exited successfully. Spawn failures and
    /// interruptions are reported as `false`.
    fn invoke(&self, prompt: &str) -> bool;
}

/// Assistant driven as a subprocess, with the prompt as its final argument.
///
/// Output is forwarded line by line while the process runs. There is no
/// timeout; only the interrupt flag stops a hung assistant.
pub struct CommandAssistant {
    workdir: PathBuf,
    program: String,
    args: Vec<String>,
    interrupt: Interrupt,
    sink: LineSink,
}

impl CommandAssistant {
    pub fn new(
        workdir: impl Into<PathBuf>,
        program: impl Into<String>,
        args: Vec<String>,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            workdir: workdir.into(),
            program: program.into(),
            args,
            interrupt,
            sink: stdout_sink(),
        }
    }

    /// Forward assistant output somewhere other than stdout.
    pub fn with_sink(mut self, sink: LineSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl AssistantRunner for CommandAssistant {
    #[instrument(skip_all, fields(program = %self.program, prompt_bytes = prompt.len()))]
    fn invoke(&self, prompt: &str) -> bool {
        trace!(prompt, "assistant prompt");
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(prompt).current_dir(&self.workdir);

        info!("running assistant");
        let exit = match run_command_streaming(cmd, self.sink.clone(), &self.interrupt) {
            Ok(exit) => exit,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "assistant could not be run");
                return false;
            }
        };
        if exit.interrupted {
            warn!("assistant interrupted");
            return false;
        }
        if !exit.status.success() {
            warn!(exit_code = ?exit.status.code(), "assistant failed");
            return false;
        }
        debug!("assistant finished");
        true
    }
}
