use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "habitflow", version, about = "Habit scheduling from the command line")]
pub struct Args {
    /// Override the service URL for this run
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the cold-start check and print where the app would land
    Status,

    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: Option<String>,
    },

    /// Create an account
    Signup {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
    },

    /// Sign out here and on the server
    Logout,

    /// Email a password reset link
    ResetPassword {
        #[arg(long)]
        email: String,
    },

    /// Exchange the stored refresh token for a new pair
    Refresh,

    /// Authenticated GET against any endpoint, printing the JSON body
    Get {
        /// Path relative to the service URL, e.g. /habit
        path: String,
    },
}
