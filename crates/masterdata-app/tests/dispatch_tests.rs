// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;
use masterdata_app::{
    ActionOutcome, CommandError, ConfirmPrompt, Dispatcher, EditMode, EntityBinding, FieldValue,
    RowId, TableAction, TableButtons, TableKind,
};
use masterdata_testkit::MemoryBinding;

fn yes() -> impl FnMut(&ConfirmPrompt) -> bool {
    |_| true
}

fn no() -> impl FnMut(&ConfirmPrompt) -> bool {
    |_| false
}

fn first_rows(binding: &MemoryBinding, table: TableKind, count: usize) -> Vec<RowId> {
    binding.rows(table).into_iter().take(count).collect()
}

#[test]
fn multi_edit_disables_only_the_edited_table() -> Result<()> {
    let mut binding = MemoryBinding::demo(5);
    let mut dispatcher = Dispatcher::new();
    let selected: Vec<_> = binding
        .rows(TableKind::Customers)
        .into_iter()
        .skip(1)
        .step_by(2)
        .take(2)
        .collect();
    dispatcher.select(TableKind::Customers, selected.clone());
    assert_eq!(
        dispatcher.controller(TableKind::Customers).buttons(),
        TableButtons::baseline(true)
    );

    let report = dispatcher.edit(TableKind::Customers, &mut binding)?;
    assert_eq!(report.rows, selected);

    let customers = dispatcher.controller(TableKind::Customers);
    assert_eq!(customers.tracker().mode(), EditMode::MultiEdit);
    assert_eq!(customers.tracker().editing_rows().len(), 2);
    let buttons = customers.buttons();
    assert!(buttons.save && buttons.cancel);
    assert!(!buttons.edit && !buttons.delete && !buttons.add);

    for table in TableKind::ALL.into_iter().skip(1) {
        assert_eq!(
            dispatcher.controller(table).buttons(),
            TableButtons::baseline(false),
            "{table}"
        );
        assert_eq!(dispatcher.controller(table).tracker().mode(), EditMode::None);
    }
    Ok(())
}

#[test]
fn edit_without_selection_stays_idle() {
    let mut binding = MemoryBinding::demo(5);
    let mut dispatcher = Dispatcher::new();

    let error = dispatcher
        .edit(TableKind::Projects, &mut binding)
        .expect_err("edit needs a selection");
    assert!(matches!(error, CommandError::NoSelection { .. }));
    assert_eq!(
        dispatcher.controller(TableKind::Projects).tracker().mode(),
        EditMode::None
    );
}

#[test]
fn adding_twice_then_cancel_sends_nothing() -> Result<()> {
    let mut binding = MemoryBinding::demo(5);
    let mut dispatcher = Dispatcher::new();
    let before = binding.rows(TableKind::Employees).len();

    let first = dispatcher.add(TableKind::Employees, &mut binding)?;
    let second = dispatcher.add(TableKind::Employees, &mut binding)?;
    let tracker = dispatcher.controller(TableKind::Employees).tracker();
    assert_eq!(tracker.mode(), EditMode::AddMulti);
    assert!(first.is_transient() && second.is_transient());
    assert_eq!(tracker.editing_rows().len(), 2);
    assert!(dispatcher.controller(TableKind::Employees).buttons().add);

    let report = dispatcher.cancel(TableKind::Employees, &mut binding, &mut yes())?;
    assert_eq!(report.discarded.len(), 2);
    assert_eq!(binding.rows(TableKind::Employees).len(), before);
    assert!(binding.requests().is_empty());
    assert_eq!(binding.batch_count(), 0);
    assert_eq!(
        dispatcher.controller(TableKind::Employees).buttons(),
        TableButtons::baseline(false)
    );
    Ok(())
}

#[test]
fn save_failure_keeps_the_session_and_retry_succeeds() -> Result<()> {
    let mut binding = MemoryBinding::demo(5);
    let mut dispatcher = Dispatcher::new();
    let row = first_rows(&binding, TableKind::Customers, 1);
    dispatcher.select(TableKind::Customers, row.clone());
    dispatcher.edit(TableKind::Customers, &mut binding)?;
    dispatcher.edit_field(
        TableKind::Customers,
        &row[0],
        "name",
        FieldValue::text("Acme, Inc."),
    )?;

    binding.fail_next_batch("503 service unavailable");
    let error = dispatcher
        .save(TableKind::Customers, &mut binding)
        .expect_err("injected batch failure");
    assert!(matches!(error, CommandError::BatchSubmitFailure { .. }));
    assert!(error.to_string().contains("503"));

    let controller = dispatcher.controller(TableKind::Customers);
    assert_eq!(controller.tracker().mode(), EditMode::SingleEdit);
    assert_eq!(controller.tracker().editing_rows(), row.as_slice());
    assert!(controller.buttons().save);

    let report = dispatcher.save(TableKind::Customers, &mut binding)?;
    assert_eq!(report.committed, row);
    let controller = dispatcher.controller(TableKind::Customers);
    assert_eq!(controller.tracker().mode(), EditMode::None);
    assert!(controller.selection().is_empty());
    assert_eq!(controller.buttons(), TableButtons::baseline(false));
    assert!(
        binding
            .server_rows(TableKind::Customers)
            .iter()
            .any(|data| data.value("name") == &FieldValue::text("Acme, Inc."))
    );
    Ok(())
}

#[test]
fn rejected_row_fails_the_save() -> Result<()> {
    let mut binding = MemoryBinding::demo(5);
    let mut dispatcher = Dispatcher::new();
    let rows = first_rows(&binding, TableKind::Projects, 2);
    dispatcher.select(TableKind::Projects, rows.clone());
    dispatcher.edit(TableKind::Projects, &mut binding)?;
    for row in &rows {
        dispatcher.edit_field(TableKind::Projects, row, "status", FieldValue::text("Archived"))?;
    }
    binding.reject_row(&rows[1], "project is locked");

    let error = dispatcher
        .save(TableKind::Projects, &mut binding)
        .expect_err("row rejection fails the save");
    assert!(error.to_string().contains("project is locked"));
    assert_eq!(
        dispatcher.controller(TableKind::Projects).tracker().mode(),
        EditMode::MultiEdit
    );

    binding.clear_rejections();
    dispatcher.save(TableKind::Projects, &mut binding)?;
    assert!(!binding.has_pending_changes(TableKind::Projects));
    Ok(())
}

fn status(binding: &MemoryBinding, row: &RowId) -> Option<FieldValue> {
    binding.object(row).map(|data| data.value("status").clone())
}

#[test]
fn cancel_after_partial_save_keeps_accepted_rows() -> Result<()> {
    let mut binding = MemoryBinding::demo(5);
    let mut dispatcher = Dispatcher::new();
    let rows = first_rows(&binding, TableKind::Projects, 3);
    let locked_status = status(&binding, &rows[1]);
    dispatcher.select(TableKind::Projects, rows[..2].to_vec());
    dispatcher.edit(TableKind::Projects, &mut binding)?;
    for row in &rows[..2] {
        dispatcher.edit_field(TableKind::Projects, row, "status", FieldValue::text("Archived"))?;
    }
    binding.reject_row(&rows[1], "project is locked");
    dispatcher
        .save(TableKind::Projects, &mut binding)
        .expect_err("row rejection fails the save");
    binding.clear_rejections();

    let report = dispatcher.cancel(TableKind::Projects, &mut binding, &mut yes())?;
    assert_eq!(report.restored, rows[..2].to_vec());
    assert!(!binding.has_pending_changes(TableKind::Projects));
    assert_eq!(status(&binding, &rows[0]), Some(FieldValue::text("Archived")));
    assert_eq!(status(&binding, &rows[1]), locked_status);

    let sent = binding.requests().len();
    dispatcher.select(TableKind::Projects, vec![rows[2].clone()]);
    dispatcher.edit(TableKind::Projects, &mut binding)?;
    dispatcher.edit_field(
        TableKind::Projects,
        &rows[2],
        "status",
        FieldValue::text("Cancelled"),
    )?;
    dispatcher.save(TableKind::Projects, &mut binding)?;

    let requests: Vec<_> = binding.requests()[sent..]
        .iter()
        .map(|request| (request.verb, request.row.clone()))
        .collect();
    assert_eq!(requests, vec![("update", rows[2].clone())]);
    assert_eq!(status(&binding, &rows[0]), Some(FieldValue::text("Archived")));
    assert_eq!(status(&binding, &rows[2]), Some(FieldValue::text("Cancelled")));
    Ok(())
}

#[test]
fn accepted_rows_of_a_partial_add_leave_the_session() -> Result<()> {
    let mut binding = MemoryBinding::demo(5);
    let mut dispatcher = Dispatcher::new();
    let before = binding.server_rows(TableKind::Employees).len();

    let first = dispatcher.add(TableKind::Employees, &mut binding)?;
    dispatcher.edit_field(TableKind::Employees, &first, "ohrId", FieldValue::Integer(900_001))?;
    dispatcher.edit_field(TableKind::Employees, &first, "firstName", FieldValue::text("Ada"))?;
    dispatcher.edit_field(TableKind::Employees, &first, "lastName", FieldValue::text("Lovelace"))?;
    let second = dispatcher.add(TableKind::Employees, &mut binding)?;
    dispatcher.edit_field(TableKind::Employees, &second, "ohrId", FieldValue::Integer(900_002))?;
    dispatcher.edit_field(TableKind::Employees, &second, "firstName", FieldValue::text("Grace"))?;
    dispatcher.edit_field(TableKind::Employees, &second, "lastName", FieldValue::text("Hopper"))?;
    binding.reject_row(&second, "duplicate badge");

    dispatcher
        .save(TableKind::Employees, &mut binding)
        .expect_err("second row is rejected");
    let controller = dispatcher.controller(TableKind::Employees);
    assert_eq!(controller.tracker().editing_rows(), std::slice::from_ref(&second));
    assert_eq!(controller.tracker().mode(), EditMode::Add);
    assert_eq!(binding.server_rows(TableKind::Employees).len(), before + 1);

    binding.clear_rejections();
    dispatcher.cancel(TableKind::Employees, &mut binding, &mut yes())?;
    assert!(!binding.has_pending_changes(TableKind::Employees));
    assert_eq!(binding.server_rows(TableKind::Employees).len(), before + 1);
    Ok(())
}

#[test]
fn every_action_is_busy_while_a_save_is_in_flight() -> Result<()> {
    let mut binding = MemoryBinding::demo(5);
    let mut dispatcher = Dispatcher::new();
    dispatcher.add(TableKind::Projects, &mut binding)?;
    let row = dispatcher.controller(TableKind::Projects).tracker().editing_rows()[0].clone();
    dispatcher.edit_field(TableKind::Projects, &row, "projectId", FieldValue::text("prj-0100"))?;
    dispatcher.edit_field(TableKind::Projects, &row, "name", FieldValue::text("Cutover"))?;

    let pending = dispatcher.start_save(TableKind::Projects, &mut binding)?;
    assert_eq!(
        dispatcher.controller(TableKind::Projects).in_flight(),
        Some(TableAction::Save)
    );
    for action in TableAction::ALL {
        let error = dispatcher
            .dispatch(TableKind::Projects, action, &mut binding, &mut yes())
            .expect_err("table is busy");
        assert!(matches!(error, CommandError::Busy { .. }), "{action}");
    }
    assert!(matches!(
        dispatcher.edit_field(TableKind::Projects, &row, "name", FieldValue::Null),
        Err(CommandError::Busy { .. })
    ));
    dispatcher.add(TableKind::Customers, &mut binding)?;

    let result = binding.submit_batch(TableKind::Projects);
    dispatcher.finish_save(pending, &mut binding, result)?;
    assert_eq!(dispatcher.controller(TableKind::Projects).in_flight(), None);
    assert_eq!(binding.rows(TableKind::Projects).len(), 7);
    Ok(())
}

#[test]
fn validation_blocks_the_batch() -> Result<()> {
    let mut binding = MemoryBinding::demo(5);
    let mut dispatcher = Dispatcher::new();
    let row = dispatcher.add(TableKind::Employees, &mut binding)?;
    dispatcher.edit_field(TableKind::Employees, &row, "ohrId", FieldValue::Integer(9))?;
    dispatcher.edit_field(TableKind::Employees, &row, "firstName", FieldValue::text("Ada"))?;

    let error = dispatcher
        .save(TableKind::Employees, &mut binding)
        .expect_err("last name is required");
    let CommandError::Validation { problems, .. } = &error else {
        panic!("expected validation error, got {error}");
    };
    assert_eq!(problems[0].missing, vec!["Last Name".to_owned()]);
    assert_eq!(binding.batch_count(), 0);
    assert_eq!(
        dispatcher.controller(TableKind::Employees).tracker().mode(),
        EditMode::Add
    );
    Ok(())
}

#[test]
fn new_customers_get_sequential_ids() -> Result<()> {
    let mut binding = MemoryBinding::demo(5);
    let mut dispatcher = Dispatcher::new();

    let first = dispatcher.add(TableKind::Customers, &mut binding)?;
    let second = dispatcher.add(TableKind::Customers, &mut binding)?;
    let key = |row: &RowId| {
        binding
            .object(row)
            .map(|data| data.value("sapcustId").clone())
    };
    assert_eq!(key(&first), Some(FieldValue::text("cust-0009")));
    assert_eq!(key(&second), Some(FieldValue::text("cust-0010")));
    Ok(())
}

#[test]
fn unavailable_next_id_leaves_key_blank() -> Result<()> {
    let mut binding = MemoryBinding::demo(5);
    let mut dispatcher = Dispatcher::new();
    binding.fail_next_customer_id("action not found");

    let row = dispatcher.add(TableKind::Customers, &mut binding)?;
    assert_eq!(
        binding.object(&row).map(|data| data.value("sapcustId").clone()),
        Some(FieldValue::Null)
    );
    Ok(())
}

#[test]
fn delete_waits_for_confirmation() -> Result<()> {
    let mut binding = MemoryBinding::demo(5);
    let mut dispatcher = Dispatcher::new();
    let rows = first_rows(&binding, TableKind::SapIdStatuses, 2);
    dispatcher.select(TableKind::SapIdStatuses, rows.clone());

    let error = dispatcher
        .delete(TableKind::SapIdStatuses, &mut binding, &mut no())
        .expect_err("declined");
    assert!(matches!(error, CommandError::Declined { .. }));
    assert!(binding.requests().is_empty());

    let mut prompts = Vec::new();
    let report = dispatcher.delete(
        TableKind::SapIdStatuses,
        &mut binding,
        &mut |prompt: &ConfirmPrompt| {
            prompts.push(prompt.message());
            true
        },
    )?;
    assert_eq!(prompts, vec!["delete 2 SAPIdStatuses rows?".to_owned()]);
    assert_eq!(report.deleted, rows);
    assert_eq!(binding.server_rows(TableKind::SapIdStatuses).len(), 8);
    assert!(
        dispatcher
            .controller(TableKind::SapIdStatuses)
            .selection()
            .is_empty()
    );
    Ok(())
}

#[test]
fn partial_delete_is_tolerated() -> Result<()> {
    let mut binding = MemoryBinding::demo(5);
    let mut dispatcher = Dispatcher::new();
    let rows = first_rows(&binding, TableKind::Opportunities, 2);
    binding.reject_row(&rows[0], "referenced by a project");
    dispatcher.select(TableKind::Opportunities, rows.clone());

    let report = dispatcher.delete(TableKind::Opportunities, &mut binding, &mut yes())?;
    assert_eq!(report.deleted, vec![rows[1].clone()]);
    assert_eq!(report.rejected.len(), 1);
    assert!(binding.rows(TableKind::Opportunities).contains(&rows[0]));
    assert!(!binding.has_pending_changes(TableKind::Opportunities));
    Ok(())
}

#[test]
fn failed_delete_batch_resets_pending_deletes() -> Result<()> {
    let mut binding = MemoryBinding::demo(5);
    let mut dispatcher = Dispatcher::new();
    let rows = first_rows(&binding, TableKind::Customers, 3);
    dispatcher.select(TableKind::Customers, rows.clone());
    binding.fail_next_batch("connection reset");

    let error = dispatcher
        .delete(TableKind::Customers, &mut binding, &mut yes())
        .expect_err("batch failure");
    assert!(matches!(error, CommandError::DeleteFailed { .. }));
    assert!(!binding.has_pending_changes(TableKind::Customers));
    for row in &rows {
        assert!(binding.object(row).is_some(), "{row} should still exist");
    }
    assert_eq!(
        dispatcher.controller(TableKind::Customers).buttons(),
        TableButtons::baseline(false)
    );
    Ok(())
}

#[test]
fn cancel_touches_only_its_table() -> Result<()> {
    let mut binding = MemoryBinding::demo(5);
    let mut dispatcher = Dispatcher::new();
    let customer = first_rows(&binding, TableKind::Customers, 1);
    let opportunity = first_rows(&binding, TableKind::Opportunities, 1);

    dispatcher.select(TableKind::Customers, customer.clone());
    dispatcher.edit(TableKind::Customers, &mut binding)?;
    dispatcher.edit_field(TableKind::Customers, &customer[0], "city", FieldValue::text("Oslo"))?;
    dispatcher.select(TableKind::Opportunities, opportunity.clone());
    dispatcher.edit(TableKind::Opportunities, &mut binding)?;
    dispatcher.edit_field(
        TableKind::Opportunities,
        &opportunity[0],
        "stage",
        FieldValue::text("Negotiate"),
    )?;

    let before = binding.object(&customer[0]);
    let error = dispatcher
        .cancel(TableKind::Customers, &mut binding, &mut no())
        .expect_err("declined");
    assert!(matches!(error, CommandError::Declined { .. }));

    dispatcher.cancel(TableKind::Customers, &mut binding, &mut yes())?;
    assert_eq!(binding.object(&customer[0]), before);
    assert_eq!(
        dispatcher.controller(TableKind::Opportunities).tracker().mode(),
        EditMode::SingleEdit
    );
    assert!(dispatcher.is_row_editable(TableKind::Opportunities, &opportunity[0]));

    let saved = dispatcher.save(TableKind::Opportunities, &mut binding)?;
    assert_eq!(saved.committed, opportunity);
    Ok(())
}

#[test]
fn controls_resolve_to_table_actions() -> Result<()> {
    let mut binding = MemoryBinding::demo(5);
    let mut dispatcher = Dispatcher::new();
    assert_eq!(
        dispatcher.resolve("btnSave_SAPIdStatuses"),
        Some((TableKind::SapIdStatuses, TableAction::Save))
    );

    let outcome = dispatcher.trigger("btnAdd_Employees", &mut binding, &mut yes())?;
    assert!(matches!(outcome, ActionOutcome::Added(_)));
    assert_eq!(outcome.status(TableKind::Employees), "employees row added");

    let error = dispatcher
        .trigger("btnExplode_Employees", &mut binding, &mut yes())
        .expect_err("unknown control");
    assert!(matches!(error, CommandError::UnknownControl(_)));
    Ok(())
}

#[test]
fn edit_is_rejected_while_adding() -> Result<()> {
    let mut binding = MemoryBinding::demo(5);
    let mut dispatcher = Dispatcher::new();
    let rows = first_rows(&binding, TableKind::Customers, 1);
    dispatcher.add(TableKind::Customers, &mut binding)?;
    dispatcher.select(TableKind::Customers, rows);

    let error = dispatcher
        .edit(TableKind::Customers, &mut binding)
        .expect_err("edit during add");
    assert!(matches!(error, CommandError::InvalidMode { .. }));
    assert!(!dispatcher.controller(TableKind::Customers).buttons().edit);
    Ok(())
}
