use chrono::Utc;
use clap::Subcommand;
use colored::Colorize;
use nxchat::api;

static REDIRECT_URI_DEFAULT: &str = "http://localhost:3000/api/auth/callback/azure-ad";

#[derive(Subcommand)]
pub enum AuthCommand {
    #[command(about = "Print the Azure AD sign-in URL")]
    Login {
        #[arg(
            short = 'r',
            long = "redirect-uri",
            help = "Redirect URI registered for the Azure AD app"
        )]
        redirect_uri: Option<String>,
    },

    #[command(about = "Finish signing in with the code returned to the redirect URI")]
    Complete {
        #[arg(
            short = 'r',
            long = "redirect-uri",
            help = "Redirect URI used when signing in"
        )]
        redirect_uri: Option<String>,

        code: String,
    },

    #[command(about = "Display the current session")]
    Status,

    #[command(about = "Forget the current session")]
    Logout,
}

impl AuthCommand {
    pub async fn exec(&self) {
        let settings = api::auth_settings();

        match self {
            AuthCommand::Login { redirect_uri } => {
                if !settings.is_enabled() {
                    println!(
                        "Sign-in is disabled, set {} to enable it",
                        "AZURE_AD_CLIENT_ID".yellow()
                    );
                    return;
                }

                let redirect_uri = redirect_uri.as_deref().unwrap_or(REDIRECT_URI_DEFAULT);
                let state = format!("{:x}", Utc::now().timestamp_micros());

                match settings.authorize_url(redirect_uri, &state) {
                    Ok(url) => {
                        println!("Open the URL below to sign in:\n\n{}\n", url.as_str().cyan());
                        println!(
                            "[I] Then run `{}` with the code parameter of the redirect",
                            "nxchat auth complete <CODE>".green()
                        );
                    }
                    Err(err) => {
                        println!("{}", err.to_string().red());
                    }
                }
            }
            AuthCommand::Complete { redirect_uri, code } => {
                let redirect_uri = redirect_uri.as_deref().unwrap_or(REDIRECT_URI_DEFAULT);

                match api::auth_sign_in(code, redirect_uri).await {
                    Ok(session) => {
                        println!("Signed in as {}", session.role.to_string().green());
                    }
                    Err(err) => {
                        println!("{}", err.to_string().red());
                    }
                }
            }
            AuthCommand::Status => match api::auth_session() {
                Ok(Some(session)) => {
                    let state = if session.is_active(Utc::now()) {
                        "active".green()
                    } else {
                        "expired".yellow()
                    };
                    println!("Session: {state}, role: {}", session.role);
                    if let Some(expires_at) = session.expires_at {
                        println!("Expires at: {}", expires_at.to_rfc3339());
                    }
                }
                Ok(None) => {
                    println!("Not signed in");
                }
                Err(err) => {
                    println!("{}", err.to_string().red());
                }
            },
            AuthCommand::Logout => {
                if let Err(err) = api::auth_sign_out() {
                    println!("{}", err.to_string().red());
                } else {
                    println!("Signed out");
                }
            }
        }
    }
}
