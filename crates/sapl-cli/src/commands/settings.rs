use anyhow::Result;
use sapl_pdp::Settings;

pub fn show(settings: &Settings) -> Result<()> {
    print!("{}", settings.to_toml()?);
    Ok(())
}
