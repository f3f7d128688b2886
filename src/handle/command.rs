use super::{Action, ActionError, ActionFuture};
use std::process::Stdio;
use tokio::process::Command;

/// [`Action`] that does nothing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoopAction;

impl Action for NoopAction {
    fn run(&self) -> ActionFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

/// [`Action`] that runs a program and waits for it to exit.
///
/// The program is killed if the action is abandoned (timeout or shutdown).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandAction {
    program: String,
    args: Vec<String>,
}

impl CommandAction {
    /// Runs `program` with `args`.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the program arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl Action for CommandAction {
    fn run(&self) -> ActionFuture<'_> {
        Box::pin(async move {
            let status = Command::new(&self.program)
                .args(&self.args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .status()
                .await
                .map_err(|source| ActionError::Spawn {
                    program: self.program.clone(),
                    source,
                })?;

            if status.success() {
                Ok(())
            } else {
                Err(ActionError::Failed {
                    program: self.program.clone(),
                    code: status.code(),
                })
            }
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command() {
        CommandAction::new("true", Vec::<String>::new())
            .run()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failing_command_reports_exit_code() {
        let err = CommandAction::new("sh", ["-c", "exit 7"])
            .run()
            .await
            .unwrap_err();
        assert!(
            matches!(err, ActionError::Failed { code: Some(7), .. }),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let err = CommandAction::new("/nonexistent/disttrust-reload", Vec::<String>::new())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Spawn { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn noop_always_succeeds() {
        NoopAction.run().await.unwrap();
    }
}
