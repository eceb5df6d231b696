mod cli_overrides;

pub use cli_overrides::CliConfigOverrides;
