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

//! Root pointers the garbage collector scans besides the heap itself.
//!
//! Ports register extra roots with `MP_REGISTER_ROOT_POINTER`; they end up
//! as members of `mp_state_vm_t` under the names below. Any given build has
//! only a handful of them.

/// How a root member is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    /// A single object pointer
    Pointer,
    /// A fixed array of object pointers
    Array,
    /// An embedded struct whose pointer members are roots
    Struct,
    /// Either a pointer or an array, depending on the build
    PointerOrArray,
}

/// One root member of a state struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootField {
    /// Member name
    pub name: &'static str,
    /// Layout
    pub kind: RootKind,
    /// Config option that removes the member when disabled
    pub feature: Option<&'static str>,
}

const fn root(name: &'static str, kind: RootKind) -> RootField {
    RootField { name, kind, feature: None }
}

const fn optional(name: &'static str, kind: RootKind, feature: &'static str) -> RootField {
    RootField { name, kind, feature: Some(feature) }
}

/// Roots in `mp_state_thread_t`.
pub const THREAD_ROOTS: &[RootField] = &[
    root("dict_locals", RootKind::Pointer),
    root("dict_globals", RootKind::Pointer),
    root("nlr_top", RootKind::Pointer),
    root("nlr_jump_callback_top", RootKind::Pointer),
    root("mp_pending_exception", RootKind::Pointer),
    root("stop_iteration_arg", RootKind::Pointer),
    optional("prof_trace_callback", RootKind::Pointer, "MICROPY_PY_SYS_SETTRACE"),
    optional("current_code_state", RootKind::Pointer, "MICROPY_PY_SYS_SETTRACE"),
    optional("tls_ssl_context", RootKind::Pointer, "MICROPY_PY_SSL_MBEDTLS_NEED_ACTIVE_CONTEXT"),
];

/// Core roots in `mp_state_vm_t`.
pub const VM_ROOTS: &[RootField] = &[
    root("last_pool", RootKind::Pointer),
    optional("m_tracked_head", RootKind::Pointer, "MICROPY_TRACKED_ALLOC"),
    optional("mp_emergency_exception_obj", RootKind::Struct, "MICROPY_ENABLE_EMERGENCY_EXCEPTION_BUF"),
    optional(
        "mp_emergency_exception_buf",
        RootKind::PointerOrArray,
        "MICROPY_ENABLE_EMERGENCY_EXCEPTION_BUF",
    ),
    optional("mp_kbd_exception", RootKind::Struct, "MICROPY_KBD_EXCEPTION"),
    root("mp_loaded_modules_dict", RootKind::Struct),
    root("dict_main", RootKind::Struct),
    optional("mp_module_builtins_override_dict", RootKind::Pointer, "MICROPY_CAN_OVERRIDE_BUILTINS"),
];

/// Port-registered single pointers.
pub const REGISTERED_POINTERS: &[&str] = &[
    "usbd",
    "bluetooth",
    "lwip_slip_stream",
    "virtio_device",
    "mp_wifi_spi",
    "mp_wifi_poll_list",
    "vfs_cur",
    "vfs_mount_table",
    "bluetooth_btstack_root_pointers",
    "bluetooth_nimble_memory",
    "bluetooth_nimble_root_pointers",
    "os_term_dup_obj",
    "machine_config_main",
    "esp32_pcnt_obj_head",
    "machine_timer_obj_head",
    "espnow_singleton",
    "uart0_rxbuf",
    "espnow_buffer",
    "machine_rtc_irq_object",
    "mp_bthci_uart",
    "pwm_active_events",
    "pwm_pending_events",
    "pin_class_mapper",
    "pin_class_map_dict",
    "modmusic_music_data",
    "keyboard_interrupt_obj",
    "pyb_config_main",
    "pyb_stdio_uart",
    "pyb_switch_callback",
    "subghz_callback",
    "pyb_hid_report_desc",
    "mmap_region_head",
    "proxy_c_ref",
    "proxy_c_dict",
    "machine_pin_irq_list",
    "bluetooth_zephyr_root_pointers",
    "cur_exception",
    "sys_exitfunc",
    "persistent_code_root_pointers",
    "track_reloc_code_list",
    "repl_line",
];

/// Port-registered pointer arrays.
pub const REGISTERED_ARRAYS: &[&str] = &[
    "machine_i2c_target_mem_obj",
    "machine_i2c_target_irq_obj",
    "dupterm_objs",
    "machine_pin_irq_obj",
    "machine_uart_obj_all",
    "pyb_uart_objs",
    "machine_i2s_obj",
    "machine_pin_irq_handler",
    "pin_irq_handler",
    "machine_pin_irq_objects",
    "async_data",
    "pin_irq_handlers",
    "nrf_uart_irq_obj",
    "pyb_extint_callback",
    "pyb_timer_obj_all",
    "rp2_uart_rx_buffer",
    "rp2_uart_tx_buffer",
    "rp2_uart_irq_obj",
    "rp2_dma_irq_obj",
    "rp2_pio_irq_obj",
    "rp2_state_machine_irq_obj",
    "sercom_table",
    "pyb_can_obj_all",
    "pyb_usb_vcp_irq",
    "sys_mutable",
];

/// Port-registered embedded structs.
pub const REGISTERED_STRUCTS: &[&str] = &[
    "mod_network_nic_list",
    "mp_irq_obj_list",
    "pyb_sleep_obj_list",
    "pyb_timer_channel_obj_list",
    "mp_sys_argv_obj",
];

/// Every registered root, each tagged with its layout.
pub fn registered_roots() -> impl Iterator<Item = RootField> {
    tagged(REGISTERED_POINTERS, RootKind::Pointer)
        .chain(tagged(REGISTERED_ARRAYS, RootKind::Array))
        .chain(tagged(REGISTERED_STRUCTS, RootKind::Struct))
}

fn tagged(names: &'static [&'static str], kind: RootKind) -> impl Iterator<Item = RootField> {
    // The member only exists when its port registers it, so the name doubles as the feature.
    names.iter().map(move |&name| RootField { name, kind, feature: Some(name) })
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;

    #[test]
    fn test_registered_names_are_unique() {
        assert_eq!(registered_roots().map(|r| r.name).duplicates().count(), 0);
    }

    #[test]
    fn test_registered_roots_are_tagged() {
        let roots = registered_roots().collect::<Vec<_>>();
        assert_eq!(
            roots.len(),
            REGISTERED_POINTERS.len() + REGISTERED_ARRAYS.len() + REGISTERED_STRUCTS.len()
        );
        let argv = roots.iter().find(|r| r.name == "mp_sys_argv_obj").unwrap();
        assert_eq!(argv.kind, RootKind::Struct);
        assert_eq!(argv.feature, Some("mp_sys_argv_obj"));
    }
}
