use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("spacebus {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: spacebus");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("SPACEBUS_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "protocols: {}, {}",
        spacebus_transport::maltcp::PROTOCOL,
        spacebus_spp::PROTOCOL
    );
    println!(
        "features: transport={}, spp={}, cli=true",
        cfg!(feature = "transport"),
        cfg!(feature = "spp")
    );

    Ok(SUCCESS)
}
