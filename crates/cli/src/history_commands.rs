use {anyhow::Result, clap::Subcommand, murmur_config::MurmurConfig, murmur_sessions::HistoryStore};

#[derive(Subcommand)]
pub enum HistoryAction {
    /// Forget the stored conversation for one chat.
    Clear {
        /// Chat identifier, e.g. `5511999999999@s.whatsapp.net`.
        chat_id: String,
    },
}

pub async fn handle_history(action: HistoryAction, config: &MurmurConfig) -> Result<()> {
    let store = HistoryStore::new(config.history_dir(), config.history.max_entries);
    match action {
        HistoryAction::Clear { chat_id } => {
            let had = store.load(&chat_id).await.len();
            store.clear(&chat_id).await?;
            println!("Cleared {had} turn(s) for {chat_id}.");
        },
    }
    Ok(())
}
