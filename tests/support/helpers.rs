//! Test helper functions for integration tests
//!
//! Procedural helpers, not rstest fixtures.

use fn_context_index::config::Config;
use fn_context_index::handlers::AppState;
use std::path::{Path, PathBuf};

pub const MATH_C: &str = "\
/* arithmetic helpers */
int add(int a, int b)
{
    return a + b;
}

int subtract(int a, int b)
{
    return a - b;
}
";

pub const FLASH_C: &str = "\
#include <stdint.h>

static uint32_t flash_read_word(const uint32_t *base, uint32_t offset)
{
    return base[offset];
}

void flash_erase_sector(uint32_t sector)
{
    // erase every page in the sector
    for (uint32_t page = 0; page < 16; page++) {
        erase_page(sector, page);
    }
}

int main(void)
{
    flash_erase_sector(0);
    return 0;
}
";

/// Open the application state on the current runtime.
pub fn open_state(config: Config) -> AppState {
    AppState::open(config).unwrap()
}

/// Write `content` to `rel` under `base`, creating parent directories.
pub fn write_source(base: &Path, rel: &str, content: &str) -> PathBuf {
    let path = base.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

pub fn stored_names(state: &AppState) -> Vec<String> {
    state
        .store
        .all()
        .iter()
        .map(|r| r.function.function_name.clone())
        .collect()
}
