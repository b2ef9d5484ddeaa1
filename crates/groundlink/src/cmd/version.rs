use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("groundlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: groundlink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("GROUNDLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "build_profile: {}",
        option_env!("GROUNDLINK_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("max_adapters: {}", groundlink_link::MAX_ADAPTERS);
    println!("tcp_port: {}", groundlink_proxy::DEFAULT_TCP_PORT);
    println!(
        "packet_sockets: {}",
        if cfg!(target_os = "linux") { "af_packet" } else { "unavailable" }
    );

    Ok(SUCCESS)
}
