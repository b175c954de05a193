use crate::account::Account;
use crate::client::Client;
use crate::console;
use crate::error::Result;

pub async fn execute(client: &Client, account: &mut Account) -> Result<()> {
    let quotas = client.get_quotas(account).await?;
    console::write_quotas(&quotas);
    Ok(())
}
