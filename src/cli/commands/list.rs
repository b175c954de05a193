use crate::account::Account;
use crate::client::Client;
use crate::console;
use crate::error::Result;

pub async fn execute(client: &Client, account: &mut Account) -> Result<()> {
    let clusters = client.list_clusters(account).await?;
    console::write_clusters(&clusters);
    Ok(())
}
