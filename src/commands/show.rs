use anyhow::{Context, Result};

use crate::cli::ShowArgs;
use crate::tutorial::Repository;

pub async fn cmd_show(args: ShowArgs) -> Result<()> {
    let repository = Repository::load(&args.repo).await?;

    let value = match &args.tutorial {
        Some(name) => {
            let tutorial = repository
                .tutorials
                .get(name)
                .with_context(|| format!("tutorial {} not found in {}", name, args.repo))?;
            serde_json::to_value(tutorial.config())?
        }
        None => repository.tutorials.to_json(),
    };

    let rendered = serde_json::to_string_pretty(&value)?;
    match &args.outfile {
        Some(outfile) => {
            std::fs::write(outfile, rendered)
                .with_context(|| format!("writing {}", outfile))?;
        }
        None => println!("{}", rendered),
    }
    Ok(())
}
