// MPDB - MicroPython Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! `set` and `show`

use std::io::Write;

use eyre::Result;
use mpdb_engine::{settings::PARAMETERS, InspectContext, Target};

/// Change a session parameter.
pub fn set_parameter<T: Target>(ctx: &mut InspectContext<T>, name: &str, value: &str) -> Result<()> {
    ctx.set_parameter(name, value)?;
    tracing::info!(name, value, "Parameter changed");
    Ok(())
}

/// Show `name`, or every parameter with its accepted values.
pub fn show_parameters<T: Target>(
    ctx: &InspectContext<T>,
    name: Option<&str>,
    out: &mut impl Write,
) -> Result<()> {
    if let Some(name) = name {
        writeln!(out, "{}", ctx.show_parameter(name)?)?;
        return Ok(());
    }
    for info in PARAMETERS {
        let value = ctx.show_parameter(info.name)?;
        writeln!(out, "{} = {value}  # {} ({})", info.name, info.doc, info.values.join(", "))?;
    }
    Ok(())
}
