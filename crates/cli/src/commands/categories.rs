//! Category inspection commands

use anyhow::Result;

use crate::commands::CommandContext;
use crate::output::{self, colors, TableFormatter};

/// Print the whole category tree
pub async fn tree(ctx: &CommandContext) -> Result<()> {
    let roots = ctx.repos.categories.tree().await?;
    if roots.is_empty() {
        println!("{}", colors::warning("No categories yet."));
        return Ok(());
    }
    output::print(ctx.format, &roots, |r| TableFormatter::category_tree(r))
}

/// Print a category and the chain of parents above it
pub async fn path(ctx: &CommandContext, slug: &str) -> Result<()> {
    let Some(category) = ctx.repos.categories.find_by_slug(slug).await? else {
        anyhow::bail!("No category with slug '{}'", slug);
    };

    let mut chain = ctx.repos.categories.ancestors(category.id).await?;
    chain.push(category);

    output::print(ctx.format, &chain, |c| {
        TableFormatter::simple(
            vec!["Depth", "Name", "Slug"],
            c.iter()
                .enumerate()
                .map(|(depth, cat)| vec![depth.to_string(), cat.name.clone(), cat.slug.clone()])
                .collect(),
        )
    })
}
