mod close;
mod integrity;
mod migrations;
