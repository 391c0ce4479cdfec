mod helpers;
mod plan;
mod settings;
mod setup;
mod shopping;

pub(crate) use helpers::resolve_window;
pub(crate) use plan::{cmd_add, cmd_done, cmd_done_list, cmd_plan, cmd_readd, cmd_remove};
pub(crate) use settings::{cmd_config_set, cmd_config_show};
pub(crate) use setup::{cmd_db_setup, cmd_db_version};
pub(crate) use shopping::{
    cmd_shopping_build, cmd_shopping_clear, cmd_shopping_send, cmd_shopping_set,
    cmd_shopping_show,
};
