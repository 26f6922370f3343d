use artvault::cli::commands::{
    account, add, completions, delete, export, list, rotate, search, show, version,
};
use artvault::cli::{output, Cli, Commands};
use clap::Parser;

fn main() {
    let cli = Cli::parse();
    artvault::logging::init(cli.verbose);

    let result = match cli.command {
        Commands::Register { ref user } => account::register(&cli, user),
        Commands::Login { ref user } => account::login(&cli, user),
        Commands::Logout => account::logout(&cli),
        Commands::Whoami => account::whoami(&cli),
        Commands::Add {
            ref file,
            ref id,
            replace,
            ref metadata,
        } => add::execute(&cli, file, id.as_deref(), replace, metadata),
        Commands::Export { ref id, ref output } => export::execute(&cli, id, output.as_deref()),
        Commands::Show { ref id } => show::execute(&cli, id),
        Commands::List => list::execute(&cli),
        Commands::Search { ref keyword } => search::execute(&cli, keyword),
        Commands::Delete { ref id, force } => delete::execute(&cli, id, force),
        Commands::RotatePassword => rotate::execute(&cli),
        Commands::Version => version::execute(),
        Commands::Completions { ref shell } => completions::execute(shell),
    };

    if let Err(e) = result {
        output::error(&e.to_string());
        std::process::exit(1);
    }
}
