//! Interactive yes/no confirmation on the terminal

use dialoguer::Confirm;
use tracing::warn;

/// Ask on the terminal; Enter, Esc, `q`, or no terminal at all mean "no".
///
/// Blocks the current worker thread, so it must run on the multi-threaded
/// runtime.
pub fn confirm_on_terminal(question: &str) -> bool {
    let answer = tokio::task::block_in_place(|| {
        Confirm::new()
            .with_prompt(question)
            .default(false)
            .interact_opt()
    });
    accepted(answer)
}

fn accepted(answer: dialoguer::Result<Option<bool>>) -> bool {
    match answer {
        Ok(Some(yes)) => yes,
        Ok(None) => false,
        Err(e) => {
            warn!(error = %e, "no interactive terminal, treating the answer as no (pass --yes to skip the prompt)");
            false
        }
    }
}
