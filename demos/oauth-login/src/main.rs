//! OAuth Login Demo
//!
//! Logs in to a provider through the browser and manages stored tokens:
//! 1. Start the loopback callback listener
//! 2. Open the authorization URL in the browser
//! 3. Capture the redirect and exchange the code
//! 4. Store the tokens in ~/.voide/oauth-tokens.json
//!
//! Run with: cargo run -p voide-oauth-login -- login github --client-id <id>

use console::style;
use tokio_util::sync::CancellationToken;
use voide_oauth::utils::mask_token;
use voide_oauth::{AuthorizeOptions, ManagerOptions, OAuthError, OAuthManager, TokenRecord};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("voide_oauth=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let manager = OAuthManager::new(ManagerOptions::default())?;

    match args.first().map(String::as_str) {
        Some("login") => {
            let Some(provider) = args.get(1) else {
                print_help();
                return Ok(());
            };
            login(&manager, provider, &args[2..]).await
        }
        Some("status") | None => {
            status(&manager);
            Ok(())
        }
        Some("token") => {
            let Some(provider) = args.get(1) else {
                print_help();
                return Ok(());
            };
            match manager.get_access_token(provider).await {
                Some(token) => println!("{} {}", style("✓").green(), mask_token(&token)),
                None => println!("{} not authenticated with {provider}", style("✗").red()),
            }
            Ok(())
        }
        Some("logout") => {
            let Some(provider) = args.get(1) else {
                print_help();
                return Ok(());
            };
            manager.revoke_token(provider)?;
            println!("{} Logged out of {provider}", style("✓").green());
            Ok(())
        }
        Some("help" | "--help" | "-h") => {
            print_help();
            Ok(())
        }
        Some(other) => {
            eprintln!("Unknown command: {other}");
            print_help();
            Ok(())
        }
    }
}

async fn login(manager: &OAuthManager, provider: &str, flags: &[String]) -> anyhow::Result<()> {
    let mut options = AuthorizeOptions::default();
    let mut flags = flags.iter();
    while let Some(flag) = flags.next() {
        match flag.as_str() {
            "--client-id" => options.client_id = flags.next().cloned(),
            "--client-secret" => options.client_secret = flags.next().cloned(),
            "--no-pkce" => options.use_pkce = Some(false),
            other => anyhow::bail!("Unknown flag: {other}"),
        }
    }
    if options.client_id.is_none() {
        let var = format!("{}_CLIENT_ID", provider.to_uppercase());
        options.client_id = std::env::var(var).ok();
    }

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    println!("Logging in to {}...", style(provider).cyan().bold());
    let result = manager
        .login_with_cancel(
            provider,
            &options,
            |request| {
                println!();
                println!("Opening browser. If it does not open, visit:");
                println!("  {}", style(&request.url).underlined());
                println!();
                if let Err(e) = open_browser(&request.url) {
                    tracing::debug!("Could not open browser: {e}");
                }
            },
            cancel,
        )
        .await;

    match result {
        Ok(record) => {
            println!("{} Authenticated with {provider}", style("✓").green());
            print_token_info(&record);
            Ok(())
        }
        Err(OAuthError::Cancelled) => {
            println!("{} Login cancelled", style("✗").yellow());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn status(manager: &OAuthManager) {
    println!("Authentication Status");
    println!("─────────────────────");
    println!("Token file: {}", manager.store().path().display());
    println!();
    for status in manager.statuses() {
        let marker = if status.authenticated {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!("{marker} {status}");
    }
}

fn print_token_info(record: &TokenRecord) {
    println!("  Access token:  {}", mask_token(&record.access_token));
    println!(
        "  Refresh token: {}",
        if record.refresh_token.is_some() {
            "present"
        } else {
            "none"
        }
    );
    if let Some(scope) = &record.scope {
        println!("  Scope:         {scope}");
    }
}

fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    std::process::Command::new("open").arg(url).spawn()?;

    #[cfg(target_os = "linux")]
    std::process::Command::new("xdg-open").arg(url).spawn()?;

    #[cfg(target_os = "windows")]
    std::process::Command::new("cmd")
        .args(["/C", "start", "", url])
        .spawn()?;

    Ok(())
}

fn print_help() {
    println!("Usage: oauth-login <command>");
    println!();
    println!("Commands:");
    println!("  login <provider> [--client-id ID] [--client-secret S] [--no-pkce]");
    println!("  status              Show every provider's authentication state");
    println!("  token <provider>    Print a (masked) valid access token, refreshing if needed");
    println!("  logout <provider>   Forget stored tokens");
    println!();
    println!("Providers: google, azure, github, anthropic");
    println!("Client IDs may also come from <PROVIDER>_CLIENT_ID, e.g. GITHUB_CLIENT_ID.");
}
