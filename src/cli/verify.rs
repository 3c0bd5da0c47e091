//! Interactive email-verification surface.

use std::error::Error;
use std::sync::Arc;

use crate::api::ChatBackend;
use crate::auth::IdentityProvider;
use crate::cli::prompt;
use crate::core::verification::VerificationFlow;

/// Runs the verification prompt loop. Returns `true` once the email is
/// verified, `false` if the user leaves first.
pub async fn run_verify(
    identity: Arc<dyn IdentityProvider>,
    backend: Arc<dyn ChatBackend>,
    email: Option<&str>,
) -> Result<bool, Box<dyn Error>> {
    let mut flow = VerificationFlow::new(identity, backend);

    println!(
        "A verification link has been sent to {}.",
        email.unwrap_or("your email address")
    );
    println!("Click the link to verify your account. Check your spam folder if you can't find it.");

    loop {
        println!();
        let cooldown = flow.cooldown();
        if cooldown > 0 {
            println!("Resend available in {cooldown}s.");
        }
        let choice = prompt("[c]heck status, [r]esend email, [q]uit: ")?;
        match choice.trim() {
            "c" | "check" => match flow.check_now().await {
                Ok(true) => {
                    println!("Email successfully verified!");
                    return Ok(true);
                }
                Ok(false) => {
                    println!(
                        "Email is still not verified. Check your inbox or try resending the email."
                    );
                }
                Err(err) => println!("{err}"),
            },
            "r" | "resend" => match flow.resend().await {
                Ok(()) => {
                    println!("A new verification email has been sent. Please check your inbox.");
                }
                Err(err) => println!("{err}"),
            },
            "q" | "quit" => return Ok(false),
            "" => {}
            other => println!("Unknown choice: {other}"),
        }
    }
}
