use anyhow::{Context, Result, bail};
use sysprop_area::{Area, VALUE_MAX_LEN};
use sysprop_config::PropConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let command = args.next().unwrap_or_default();

    let config_path = std::env::var("PROPCTL_CONFIG").unwrap_or_else(|_| "propctl.toml".into());
    let config = PropConfig::load(config_path).unwrap_or_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    match command.as_str() {
        "get" => {
            let name = args.next().context("usage: propctl get <name>")?;
            let area = attach_reader(&config)?;
            let mut buf = [0u8; VALUE_MAX_LEN];
            let n = area.get(&name, &mut buf);
            println!("{}", String::from_utf8_lossy(&buf[..n]));
        }
        "list" => {
            let area = attach_reader(&config)?;
            area.foreach(|rec| {
                let name = String::from_utf8_lossy(rec.name_bytes()).into_owned();
                let mut buf = [0u8; VALUE_MAX_LEN];
                let n = area.get(&name, &mut buf);
                println!("{name}={}", String::from_utf8_lossy(&buf[..n]));
            });
        }
        "wait" => {
            let name = args.next().context("usage: propctl wait <name>")?;
            let area = attach_reader(&config)?;
            let rec = area
                .find(&name)
                .with_context(|| format!("no such property: {name}"))?;
            area.wait(rec);
            let mut buf = [0u8; VALUE_MAX_LEN];
            let n = area.get(&name, &mut buf);
            println!("{}", String::from_utf8_lossy(&buf[..n]));
        }
        "set" => {
            let name = args.next().context("usage: propctl set <name> <value>")?;
            let value = args.next().context("usage: propctl set <name> <value>")?;
            sysprop_ipc::set(&config.service_socket, &name, &value)
                .with_context(|| format!("setting {name} via {}", config.service_socket))?;
            info!(name, value, "property set request acknowledged");
        }
        other => bail!(
            "unknown command '{other}'; expected one of: get, set, list, wait"
        ),
    }

    Ok(())
}

fn attach_reader(config: &PropConfig) -> Result<Area> {
    Area::attach(&config.area_path, &config.area_env_var)
        .with_context(|| format!("attaching to property area at {}", config.area_path))
}
