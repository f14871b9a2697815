use anyhow::Result;

use crate::cli::ListArgs;
use crate::tutorial::Repository;

pub async fn cmd_list(args: ListArgs) -> Result<()> {
    let repository = Repository::load(&args.repo).await?;
    for name in repository.tutorials.names() {
        println!("{}", name);
    }
    Ok(())
}
