use dotenvy::dotenv;
use eyre::Result;

/// Load `.env` from the working directory, if present.
pub fn load_env() -> Result<()> {
    dotenv().ok();
    Ok(())
}
